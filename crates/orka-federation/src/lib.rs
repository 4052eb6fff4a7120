pub mod health;
pub mod router;

pub use router::FederationRouter;
