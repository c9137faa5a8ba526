//! Signal name/number parsing for `stop --signal`.

use nix::sys::signal::Signal;

use crate::error::Error;
use crate::Result;

pub fn parse_signal(spec: &str) -> Result<Signal> {
    let spec = spec.trim();
    let signal = match spec.to_ascii_uppercase().as_str() {
        "TERM" | "SIGTERM" | "15" => Signal::SIGTERM,
        "KILL" | "SIGKILL" | "9" => Signal::SIGKILL,
        "INT" | "SIGINT" | "2" => Signal::SIGINT,
        "QUIT" | "SIGQUIT" | "3" => Signal::SIGQUIT,
        "HUP" | "SIGHUP" | "1" => Signal::SIGHUP,
        _ => return Err(Error::InvalidSignal(spec.to_string()).into()),
    };
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_name_and_number() {
        assert_eq!(parse_signal("TERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("9").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("sigint").unwrap(), Signal::SIGINT);
    }

    #[test]
    fn rejects_unknown() {
        assert!(parse_signal("BOGUS").is_err());
    }
}
