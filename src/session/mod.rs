//! Sessions: per-browser-window cookie, injection and option state, plus the
//! open-session registry the dispatcher resolves requests against.

pub mod cookie_jar;
pub mod registry;
pub mod session;
pub mod sync_cookie;

pub use cookie_jar::{CookieJar, StoredCookie};
pub use registry::{SessionRegistry, SESSION_NOT_OPENED};
pub use session::{
    InjectableResources, RequestTimeouts, Session, SessionOptions, UserScript,
    DEFAULT_AJAX_TIMEOUT, DEFAULT_PAGE_TIMEOUT,
};
pub use sync_cookie::{parse_sync_entry, split_cookie_header, SyncCookie, SyncKind};
