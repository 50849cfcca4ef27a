pub mod collab;
pub mod session;
pub mod sync;
pub mod health;
pub mod ready;
pub mod diagnostics;
pub mod error;

pub use collab::*;
pub use session::*;
pub use sync::*;
pub use health::*;
pub use ready::*;
pub use diagnostics::*;
pub use error::*;
