//! Lowering of a typed intermediate language, recovered from x86-64 machine code, to textual LLVM
//! IR and to SMT verification events.

pub mod annotations;
pub mod app;
pub mod arch;
pub mod cfg;
pub mod containers;
pub mod dynamic_variable;
pub mod fold;
pub mod function;
pub mod generation_config;
pub mod il;
pub mod llvm;
pub mod llvm_gen;
pub mod llvm_intrinsics;
pub mod smt;
pub mod types;
pub mod vcg;
pub mod x86_64;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    /// Where and how much to log
    #[derive(Clone, Debug, Default)]
    pub struct LogSettings {
        /// 0 logs warnings and above; each increment adds a level, up to trace at 3
        pub verbosity: usize,
        pub disable_terminal_logging: bool,
        /// Block rather than drop records when the terminal cannot keep up
        pub force_block: bool,
        /// Also log, as JSON, to this file. Terminal logging is then restricted to errors.
        pub log_file: Option<std::path::PathBuf>,
    }

    /// Sends records to an optional JSON log file and to the terminal
    pub struct FileAndTermDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }

    impl FileAndTermDrain {
        /// A root logger for the given settings. Install it with
        /// `slog_scope::set_global_logger` to enable the crate's logging.
        pub fn new(settings: &LogSettings) -> Result<slog::Logger, sloggers::Error> {
            use sloggers::types::{Format, OverflowStrategy, Severity};
            use sloggers::Build;

            let level = match settings.verbosity {
                0 => Severity::Warning,
                1 => Severity::Info,
                2 => Severity::Debug,
                _ => Severity::Trace,
            };
            let to_file = settings.log_file.is_some();

            let term_drain = if settings.disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build()?
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if to_file { Severity::Error } else { level })
                    .overflow_strategy(if settings.force_block || !to_file {
                        OverflowStrategy::Block
                    } else {
                        OverflowStrategy::DropAndReport
                    })
                    .format(Format::Compact)
                    .build()?
            };

            let file_drain = match &settings.log_file {
                Some(path) => Some(
                    sloggers::file::FileLoggerBuilder::new(path)
                        .truncate()
                        .level(level)
                        .overflow_strategy(OverflowStrategy::Block)
                        .format(Format::Json)
                        .build()?,
                ),
                None => None,
            };

            Ok(slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            ))
        }
    }

    impl slog::Drain for FileAndTermDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(
            &self,
            r: &slog::Record<'_>,
            kv: &slog::OwnedKVList,
        ) -> Result<<Self as slog::Drain>::Ok, <Self as slog::Drain>::Err> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)?;
            Ok(())
        }
    }
}
