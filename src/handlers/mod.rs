pub mod health;
pub mod session;
pub mod stream;
pub mod sync;
pub mod diagnostics;

pub use health::*;
pub use session::*;
pub use stream::*;
pub use sync::*;
pub use diagnostics::*;
