pub mod atom;
pub mod error;
pub mod reader;

pub use atom::Atom;
pub use error::Fmp4Error;
pub use reader::AtomReader;
