use std::cell::RefCell;
use std::fmt::{self, Display};

use string_interner::{backend::StringBackend, StringInterner};

pub struct SessionGlobals {
    pub symbol_interner: StringInterner<StringBackend<usize>>,
}

thread_local!(static SESSION_GLOBALS: RefCell<SessionGlobals> = RefCell::new(
    SessionGlobals {
        symbol_interner: StringInterner::new(),
    }
));

pub fn with_session_globals<R, F>(f: F) -> R
where
    F: FnOnce(&mut SessionGlobals) -> R,
{
    SESSION_GLOBALS.with_borrow_mut(f)
}

/// Interned name. Globals, function-table entries and environment keys are
/// all identified by `Symbol` instead of owned strings.
#[derive(Default, Copy, Clone, PartialEq, Debug, Hash, Eq)]
pub struct Symbol(pub usize);

pub trait ToSymbol {
    fn to_symbol(&self) -> Symbol;
}

impl<T: AsRef<str>> ToSymbol for T {
    fn to_symbol(&self) -> Symbol {
        Symbol(with_session_globals(|session_globals| {
            session_globals.symbol_interner.get_or_intern(self.as_ref())
        }))
    }
}

impl Symbol {
    pub fn as_str(&self) -> &str {
        with_session_globals(|session_globals| unsafe {
            // This transmute is needed to convince the borrow checker. Since
            // the session_global should exist until the end of the session,
            // this &str should live sufficiently long.
            std::mem::transmute::<&str, &str>(
                session_globals
                    .symbol_interner
                    .resolve(self.0)
                    .expect("invalid symbol"),
            )
        })
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
