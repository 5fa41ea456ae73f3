//! Parish-list parsing — pluggable strategy per hosting platform.
//!
//! Strategy selection is a pure function of signals on the directory page;
//! the registry delegates to the first parser that can handle the page and
//! falls back to a generic link-heuristic parser.

mod dioceses;
mod registry;
mod signals;
mod strategies;

pub use dioceses::{parse_diocese_registry, RegistryDiocese};
pub use registry::{default_registry, ParserRegistry};
pub use signals::PageSignals;
pub use strategies::{
    EcatholicParser, GenericListParser, ParishListParser, ParsedParish, SquarespaceParser,
    WordpressParser,
};
