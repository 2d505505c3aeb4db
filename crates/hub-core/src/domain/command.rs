//! Operator commands and their single-key bindings.

/// An action the operator can request with one keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorCommand {
    Accelerate,
    Decelerate,
    Brake,
    SteerLeft,
    SteerRight,
    Quit,
}

impl OperatorCommand {
    /// Maps a raw keystroke to a command.
    ///
    /// | key | command |
    /// |-----|---------|
    /// | `w` | accelerate |
    /// | `s` | decelerate |
    /// | `b` | brake |
    /// | `a` | steer left |
    /// | `d` | steer right |
    /// | `q` | quit |
    ///
    /// Every other byte maps to `None` and has no effect.
    pub fn from_key(key: u8) -> Option<Self> {
        match key {
            b'w' => Some(OperatorCommand::Accelerate),
            b's' => Some(OperatorCommand::Decelerate),
            b'b' => Some(OperatorCommand::Brake),
            b'a' => Some(OperatorCommand::SteerLeft),
            b'd' => Some(OperatorCommand::SteerRight),
            b'q' => Some(OperatorCommand::Quit),
            _ => None,
        }
    }
}
