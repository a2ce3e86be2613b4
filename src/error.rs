use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the visualization engine.
pub type Result<T> = std::result::Result<T, VisErr>;

/// The broad family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The objective or its targets are invalid for the model, caught before optimizing.
    Specification,
    /// The optimization diverged.
    Numerical,
    /// A tensor reached the host network with an incompatible shape.
    Shape,
    /// A render configuration could not be parsed or is inconsistent.
    Config,
}

/// The visualization engine's error type.
#[derive(Debug)]
pub enum VisErr {
    MalformedObjective {
        spec: String,
        reason: &'static str,
    },
    PartialBatch {
        requested: Vec<usize>,
        batch_size: usize,
    },
    BatchOutOfRange {
        index: usize,
        batch_size: usize,
    },
    LayerNotFound {
        layer: String,
    },
    MissingActivation {
        layer: String,
    },
    DirectionLength {
        layer: String,
        got: usize,
        expected: usize,
    },
    ChannelOutOfRange {
        layer: String,
        channel: usize,
        channels: usize,
    },
    PositionOutOfRange {
        layer: String,
        position: (usize, usize),
        size: (usize, usize),
    },
    NonFinite {
        step: usize,
        what: &'static str,
    },
    ShapeMismatch {
        stage: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    NotForwarded {
        layer: &'static str,
    },
    InvalidConfig(String),
    Json(serde_json::Error),
}

impl VisErr {
    /// Returns the family of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisErr::MalformedObjective { .. }
            | VisErr::PartialBatch { .. }
            | VisErr::BatchOutOfRange { .. }
            | VisErr::LayerNotFound { .. }
            | VisErr::MissingActivation { .. }
            | VisErr::DirectionLength { .. }
            | VisErr::ChannelOutOfRange { .. }
            | VisErr::PositionOutOfRange { .. } => ErrorKind::Specification,
            VisErr::NonFinite { .. } => ErrorKind::Numerical,
            VisErr::ShapeMismatch { .. }
            | VisErr::SizeMismatch { .. }
            | VisErr::NotForwarded { .. } => ErrorKind::Shape,
            VisErr::InvalidConfig(_) | VisErr::Json(_) => ErrorKind::Config,
        }
    }
}

impl Display for VisErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisErr::MalformedObjective { spec, reason } => {
                write!(f, "malformed objective \"{spec}\": {reason}")
            }
            VisErr::PartialBatch {
                requested,
                batch_size,
            } => write!(
                f,
                "targeting batch slots {requested:?} out of {batch_size} is not supported, \
                 target one slot or all of them"
            ),
            VisErr::BatchOutOfRange { index, batch_size } => write!(
                f,
                "batch index {index} is out of range for a batch of size {batch_size}"
            ),
            VisErr::LayerNotFound { layer } => {
                write!(f, "the model has no layer named \"{layer}\"")
            }
            VisErr::MissingActivation { layer } => write!(
                f,
                "layer \"{layer}\" produced no activation during the forward pass"
            ),
            VisErr::DirectionLength {
                layer,
                got,
                expected,
            } => write!(
                f,
                "direction for layer \"{layer}\" has {got} components, \
                 the layer has {expected} channels"
            ),
            VisErr::ChannelOutOfRange {
                layer,
                channel,
                channels,
            } => write!(
                f,
                "channel {channel} is out of range for layer \"{layer}\" with {channels} channels"
            ),
            VisErr::PositionOutOfRange {
                layer,
                position: (x, y),
                size: (w, h),
            } => write!(
                f,
                "position ({x}, {y}) is outside the {w}x{h} activation of layer \"{layer}\""
            ),
            VisErr::NonFinite { step, what } => {
                write!(f, "non-finite {what} at step {step}")
            }
            VisErr::ShapeMismatch {
                stage,
                got,
                expected,
            } => write!(
                f,
                "{stage} produced shape {got:?}, the model expects {expected:?}"
            ),
            VisErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch for {what}: got {got}, expected {expected}"
            ),
            VisErr::NotForwarded { layer } => {
                write!(f, "{layer} ran backward before any forward pass")
            }
            VisErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            VisErr::Json(e) => write!(f, "invalid json config: {e}"),
        }
    }
}

impl Error for VisErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            VisErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for VisErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
