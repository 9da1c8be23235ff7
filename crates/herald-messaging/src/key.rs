use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::MessageError;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique key minted on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    /// Mint a token that no other call in this process will return
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Identity of a live shared object, taken from its allocation address
///
/// Two identities are equal only if they were taken from the same allocation. The
/// identity stays meaningful while the object is alive; once it is dropped the
/// address may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentity(usize);

impl ObjectIdentity {
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        ObjectIdentity(Arc::as_ptr(object) as *const () as usize)
    }
}

/// Name under which messages are sent, handled and waited for
///
/// Keys of different kinds never compare equal: the name `"7"` is not the token `7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// A string name such as `"Ping"` or `"SaveData"`
    Name(Arc<str>),
    /// The identity of a shared object
    Identity(ObjectIdentity),
    /// A unique token
    Token(Token),
}

impl MessageKey {
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        MessageKey::Name(name.into())
    }

    pub fn identity_of<T: ?Sized>(object: &Arc<T>) -> Self {
        MessageKey::Identity(ObjectIdentity::of(object))
    }

    pub fn token(token: Token) -> Self {
        MessageKey::Token(token)
    }

    /// Mint a fresh token key
    pub fn unique() -> Self {
        MessageKey::Token(Token::new())
    }

    /// The empty name stands in for "no key" and is rejected by every bus operation.
    pub fn is_absent(&self) -> bool {
        matches!(self, MessageKey::Name(name) if name.is_empty())
    }

    pub(crate) fn validate(&self) -> Result<(), MessageError> {
        if self.is_absent() {
            return Err(MessageError::InvalidKey);
        }
        Ok(())
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKey::Name(name) => write!(f, "{}", name),
            MessageKey::Identity(identity) => write!(f, "identity:{:#x}", identity.0),
            MessageKey::Token(token) => write!(f, "token:{}", token.0),
        }
    }
}

impl From<&str> for MessageKey {
    fn from(name: &str) -> Self {
        MessageKey::Name(Arc::from(name))
    }
}

impl From<String> for MessageKey {
    fn from(name: String) -> Self {
        MessageKey::Name(Arc::from(name))
    }
}

impl From<Arc<str>> for MessageKey {
    fn from(name: Arc<str>) -> Self {
        MessageKey::Name(name)
    }
}

impl From<Token> for MessageKey {
    fn from(token: Token) -> Self {
        MessageKey::Token(token)
    }
}

impl From<ObjectIdentity> for MessageKey {
    fn from(identity: ObjectIdentity) -> Self {
        MessageKey::Identity(identity)
    }
}

impl From<&MessageKey> for MessageKey {
    fn from(key: &MessageKey) -> Self {
        key.clone()
    }
}
