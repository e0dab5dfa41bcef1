use std::fmt;

/// How much a command narrates, and where it goes.
///
/// Human-facing summaries write to stderr through the `fmt::Write` impl,
/// so that machine-readable payloads (`--json`) own stdout and stay
/// pipeable even when narration is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Printer {
    /// Narrate to stderr.
    Default,
    /// Suppress narration.
    Quiet,
    /// Narrate to stderr alongside debug logs.
    Verbose,
}

impl Printer {
    /// Emit a machine-readable payload on stdout.
    ///
    /// Always emitted, `--quiet` included: suppressing the payload would
    /// defeat `--json`.
    pub(crate) fn stdout(self, contents: impl fmt::Display) {
        #[allow(clippy::print_stdout)]
        {
            anstream::println!("{contents}");
        }
    }
}

impl fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self {
            Self::Default | Self::Verbose => {
                #[allow(clippy::print_stderr)]
                {
                    anstream::eprint!("{s}");
                }
            }
            Self::Quiet => {}
        }

        Ok(())
    }
}
