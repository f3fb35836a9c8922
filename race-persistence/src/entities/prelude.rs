pub use super::round_results::Entity as RoundResults;
pub use super::rounds::Entity as Rounds;
pub use super::sentences::Entity as Sentences;
