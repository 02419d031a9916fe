use std::io::{self, BufRead, Write};
use std::process::exit;

use malbolge::{
    loader::{self, LoadMode},
    vcpu::VirtualCpu,
    MalbolgeError,
};

fn main() {
    match run() {
        Ok(()) => {}
        Err(MalbolgeError::System { code, message }) => {
            eprintln!("{}", message);
            exit(code);
        }
        Err(error) => {
            eprintln!("{}", error);
            exit(1);
        }
    }
}

fn run() -> Result<(), MalbolgeError> {
    let vmem = match std::env::args().nth(1) {
        Some(path) => loader::load_path(path, LoadMode::Auto)?,
        None => loader::load_stdin(LoadMode::Auto)?,
    };

    let vcpu = VirtualCpu::new(vmem);

    let _output = vcpu.register_for_output_signal(|byte: &u8| {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(&[*byte]);
        let _ = stdout.flush();
    });

    // feed a line of stdin whenever the program asks for input
    let handle = vcpu.handle();
    let _input = vcpu.register_for_input_signal(move |_: &()| {
        let mut line = String::new();
        if let Ok(n) = io::stdin().lock().read_line(&mut line) {
            if n > 0 {
                handle.add_input(line.as_bytes());
            }
        }
    });

    vcpu.run()?;
    match vcpu.wait() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
