use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a session in its required progression.
///
/// Ordered: `Intake < Confirmation < Terminal`.
#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Intake,
    Confirmation,
    Terminal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Confirmation => "confirmation",
            Self::Terminal => "terminal",
        }
    }

    /// The stage that follows this one. `Terminal` is absorbing.
    pub fn next(self) -> Self {
        match self {
            Self::Intake => Self::Confirmation,
            Self::Confirmation | Self::Terminal => Self::Terminal,
        }
    }

    /// Whether the intake stage has completed, which opens the `content` side channel.
    pub fn intake_completed(self) -> bool {
        self > Self::Intake
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an envelope's type tag asks for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnvelopeKind {
    Intake,
    Confirmation,
    /// Read back the accumulator; does not advance.
    Content,
    Unsupported(String),
}

impl EnvelopeKind {
    pub const INTAKE: &'static str = "intake";
    pub const CONFIRMATION: &'static str = "confirmation";
    pub const CONTENT: &'static str = "content";

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            Self::INTAKE => Self::Intake,
            Self::CONFIRMATION => Self::Confirmation,
            Self::CONTENT => Self::Content,
            other => Self::Unsupported(other.to_owned()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Intake => Self::INTAKE,
            Self::Confirmation => Self::CONFIRMATION,
            Self::Content => Self::CONTENT,
            Self::Unsupported(tag) => tag,
        }
    }

    /// Stage guard. `None` means the kind is not gated.
    pub fn admits(&self, current: Stage) -> Option<bool> {
        match self {
            Self::Intake => Some(current == Stage::Intake),
            Self::Confirmation => Some(current == Stage::Confirmation),
            Self::Content => Some(current.intake_completed()),
            Self::Unsupported(_) => None,
        }
    }
}
