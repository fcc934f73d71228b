//! tmux-side identifiers.
//!
//! `%N` / `@N` / `$N` are first-class domain values, not reused as native
//! [`crate::layout::PaneId`]/`TabId` tokens — the controller keeps an
//! explicit bidirectional mapping between the two domains (see
//! `crate::tmux::controller`).

use std::fmt;
use std::str::FromStr;

macro_rules! tmux_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.strip_prefix($prefix)
                    .and_then(|rest| rest.parse().ok())
                    .map($name)
                    .ok_or(())
            }
        }
    };
}

tmux_id!(TmuxWindowId, "@");
tmux_id!(TmuxPaneId, "%");
tmux_id!(TmuxSessionId, "$");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_round_trip() {
        assert_eq!(TmuxPaneId(3).to_string(), "%3");
        assert_eq!("%3".parse::<TmuxPaneId>(), Ok(TmuxPaneId(3)));
        assert_eq!(TmuxWindowId(1).to_string(), "@1");
        assert_eq!("@1".parse::<TmuxWindowId>(), Ok(TmuxWindowId(1)));
        assert_eq!(TmuxSessionId(0).to_string(), "$0");
        assert_eq!("$0".parse::<TmuxSessionId>(), Ok(TmuxSessionId(0)));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!("@3".parse::<TmuxPaneId>().is_err());
        assert!("not-an-id".parse::<TmuxPaneId>().is_err());
    }
}
