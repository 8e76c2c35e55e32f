//! Console command parsing

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Roll(u16),
    Peers,
    Leaderboard,
    Log,
    Verify { seed: String, commit: String },
    Alias(String),
    Help,
    Exit,
}

/// What one console line amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// Blank input, nothing to do
    None,
    Command(Command),
    /// User-facing complaint, printed locally
    Error(String),
}

pub fn parse(line: &str) -> Parsed {
    let raw = line.trim();
    if raw.is_empty() {
        return Parsed::None;
    }
    if !raw.starts_with('/') {
        return Parsed::Error("type /help for the command list".into());
    }

    let mut parts = raw[1..].splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().unwrap_or_default().trim();

    match cmd.as_str() {
        "roll" => match parse_dice(rest) {
            Some(sides) => Parsed::Command(Command::Roll(sides)),
            None => Parsed::Error("usage: /roll <d4|d6|d8|d10|d12|d20|d100>".into()),
        },
        "peers" => Parsed::Command(Command::Peers),
        "leaderboard" => Parsed::Command(Command::Leaderboard),
        "log" => Parsed::Command(Command::Log),
        "verify" => {
            let mut args = rest.split_whitespace();
            match (args.next(), args.next()) {
                (Some(seed), Some(commit)) => Parsed::Command(Command::Verify {
                    seed: seed.to_string(),
                    commit: commit.to_string(),
                }),
                _ => Parsed::Error("usage: /verify <seedHex> <commitHex>".into()),
            }
        }
        "alias" => {
            if rest.is_empty() {
                Parsed::Error("usage: /alias <name>".into())
            } else {
                Parsed::Command(Command::Alias(rest.to_string()))
            }
        }
        "help" => Parsed::Command(Command::Help),
        "exit" | "quit" => Parsed::Command(Command::Exit),
        other => Parsed::Error(format!("unknown command: /{other}, type /help")),
    }
}

/// Accepts "d20" or "20"
fn parse_dice(arg: &str) -> Option<u16> {
    let digits = arg.trim().trim_start_matches(['d', 'D']);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_accepts_both_spellings() {
        assert_eq!(parse("/roll d20"), Parsed::Command(Command::Roll(20)));
        assert_eq!(parse("/roll 100"), Parsed::Command(Command::Roll(100)));
        // validity of the sides value is the engine's call
        assert_eq!(parse("/roll d7"), Parsed::Command(Command::Roll(7)));
        assert!(matches!(parse("/roll"), Parsed::Error(_)));
        assert!(matches!(parse("/roll dd"), Parsed::Error(_)));
    }

    #[test]
    fn test_verify_needs_two_args() {
        assert_eq!(
            parse("/verify aabb ccdd"),
            Parsed::Command(Command::Verify {
                seed: "aabb".into(),
                commit: "ccdd".into()
            })
        );
        assert!(matches!(parse("/verify aabb"), Parsed::Error(_)));
    }

    #[test]
    fn test_misc_commands() {
        assert_eq!(parse("  "), Parsed::None);
        assert_eq!(parse("/peers"), Parsed::Command(Command::Peers));
        assert_eq!(parse("/EXIT"), Parsed::Command(Command::Exit));
        assert_eq!(parse("/quit"), Parsed::Command(Command::Exit));
        assert_eq!(
            parse("/alias The Gambler"),
            Parsed::Command(Command::Alias("The Gambler".into()))
        );
        assert!(matches!(parse("hello"), Parsed::Error(_)));
        assert!(matches!(parse("/nope"), Parsed::Error(_)));
    }
}
