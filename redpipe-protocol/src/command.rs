//! Logical requests.

use bytes::Bytes;

/// A command: its name followed by binary-safe arguments.
///
/// Commands are encoded as RESP arrays of bulk strings, so arguments may hold
/// arbitrary bytes including CR and LF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Creates a command with no arguments beyond its name.
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, value: impl Into<Bytes>) -> Self {
        self.args.push(value.into());
        self
    }

    /// `PING`
    pub fn ping() -> Self {
        Self::new("PING")
    }

    /// `AUTH [username] password`
    pub fn auth(username: Option<&str>, password: &str) -> Self {
        let mut cmd = Self::new("AUTH");
        if let Some(user) = username {
            cmd = cmd.arg(user.to_string());
        }
        cmd.arg(password.to_string())
    }

    /// `CLIENT SETNAME name`
    pub fn client_setname(name: &str) -> Self {
        Self::new("CLIENT").arg("SETNAME").arg(name.to_string())
    }

    /// `SELECT db`
    pub fn select(db: u32) -> Self {
        Self::new("SELECT").arg(db.to_string())
    }

    /// Returns the command name (first element).
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Returns all elements including the name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}
