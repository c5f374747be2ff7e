//! Options that impact target IR generation.
//!
//! Options are passed explicitly to the generator; there is no global configuration.

/// Options for target IR generation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOptions {
    /// Paths the recovered program can never take (e.g., an out-of-range lookup table index, or
    /// `bsf` of zero where the machine code guards against it) may be lowered to undefined
    /// behavior. This lets LLVM optimize more aggressively, at the cost of making such paths
    /// unobservable if the recovery was wrong.
    pub allow_undefined_behavior_on_impossible_paths: bool,
    /// Emit machine instruction boundaries and IL comments as LLVM comments
    pub emit_instruction_comments: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions {
            allow_undefined_behavior_on_impossible_paths: false,
            emit_instruction_comments: true,
        }
    }
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Generation options, as exposed on a command line
pub enum CommandLineGenerationOption {
    AllowUndefinedBehaviorOnImpossiblePaths,
    DisableInstructionComments,
}

impl From<Vec<CommandLineGenerationOption>> for GenerationOptions {
    fn from(v: Vec<CommandLineGenerationOption>) -> Self {
        use CommandLineGenerationOption::*;
        let mut r = GenerationOptions::default();
        for v in v {
            match v {
                AllowUndefinedBehaviorOnImpossiblePaths => {
                    r.allow_undefined_behavior_on_impossible_paths = true;
                }
                DisableInstructionComments => {
                    r.emit_instruction_comments = false;
                }
            }
        }
        r
    }
}
