pub mod model;
pub mod tree;

pub use model::Session;
pub use tree::SessionTree;
