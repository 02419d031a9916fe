/// The definitions

/// The memory space definitions
pub mod memory {
    /// The number of cells in the virtual machine address space (3^10).
    pub const SIZE: usize = 59049;
}

/// The trit definitions
pub mod trit {
    /// Trit number base, always 3.
    pub const BASE: u32 = 3;
    /// Number of bits required to represent a trit.
    pub const BITS_PER_TRIT: u32 = 2;
    /// The amount of trits in a malbolge word.
    pub const WIDTH: usize = 10;
    /// The largest value a 10 trit word can hold.
    pub const MAX: u32 = 59048;
}

/// The instruction cipher definitions
pub mod cipher {
    /// The number of graphical ASCII characters, and with that the size of
    /// both cipher tables.
    pub const SIZE: usize = 94;
    /// The first graphical ASCII character (`!`).
    pub const GRAPHICAL_MIN: u32 = 33;
    /// The last graphical ASCII character (`~`).
    pub const GRAPHICAL_MAX: u32 = 126;
}

/// The definitions needed for the vCPU I/O handshake.
pub mod io {
    use std::time::Duration;

    /// Delay between polls of the input queue while a read instruction is
    /// waiting for data.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(25);
}
