pub mod result_repository;
pub mod round_repository;

pub use result_repository::{NewRoundResult, ResultRepository};
pub use round_repository::RoundRepository;
