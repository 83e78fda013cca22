//! The message envelope dispatched through a state machine.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A lightweight, cloneable message envelope.
///
/// The engine routes messages purely by `what`; the optional integer
/// arguments and the payload are carried through untouched. Payloads sit
/// behind an [`Arc`] so cloning the envelope (deferral keeps a copy) never
/// copies the payload itself.
///
/// # Example
///
/// ```rust
/// use tokio_hsm::Message;
///
/// let m = Message::new(7).with_args(42, 0).with_payload("job-7".to_string());
/// assert_eq!(m.what, 7);
/// assert_eq!(m.arg1, Some(42));
/// assert!(m.payload::<String>().is_some());
/// ```
#[derive(Clone, Default)]
pub struct Message {
    /// Integer discriminator; the only field the engine ever inspects.
    pub what: i32,
    /// First optional integer argument.
    pub arg1: Option<i64>,
    /// Second optional integer argument.
    pub arg2: Option<i64>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Message {
    /// Creates a message carrying only a `what` code.
    #[must_use]
    pub fn new(what: i32) -> Self {
        Self {
            what,
            ..Self::default()
        }
    }

    /// Sets both integer arguments.
    #[must_use]
    pub fn with_args(mut self, arg1: i64, arg2: i64) -> Self {
        self.arg1 = Some(arg1);
        self.arg2 = Some(arg2);
        self
    }

    /// Attaches an opaque payload. The engine never inspects it.
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Borrows the payload downcast to `T`, if present and of that type.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }

    /// Whether any payload is attached.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl From<i32> for Message {
    fn from(what: i32) -> Self {
        Self::new(what)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("arg1", &self.arg1)
            .field("arg2", &self.arg2)
            .field("payload", &self.payload.as_ref().map(|_| ".."))
            .finish()
    }
}
