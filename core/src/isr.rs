//! Interrupt service requests returned by an I/O controller.

/// The reply an I/O controller gives when polled for interrupts.
///
/// `Zero` through `Seven` are the 8080 hardware interrupt vectors. `Load`,
/// `Save` and `Quit` are machine-level requests serviced by the run loop
/// rather than the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isr {
    NoInterrupt,
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Load,
    Save,
    Quit,
}

impl Isr {
    /// The hardware vector number, for `Zero`..`Seven`.
    #[must_use]
    pub const fn vector(self) -> Option<u8> {
        match self {
            Self::Zero => Some(0),
            Self::One => Some(1),
            Self::Two => Some(2),
            Self::Three => Some(3),
            Self::Four => Some(4),
            Self::Five => Some(5),
            Self::Six => Some(6),
            Self::Seven => Some(7),
            _ => None,
        }
    }
}
