//! Repository layer for data access

pub mod aliases;
pub mod messages;
pub mod transactions;
pub mod users;

// Re-export concrete repository implementations with simple names
pub use aliases::DbAliasRepository as AliasRepositoryImpl;
pub use messages::DbMessageRepository as MessageRepositoryImpl;
pub use transactions::DbTransactionRepository as TransactionRepositoryImpl;
pub use users::DbUserRepository as UserRepositoryImpl;

// Re-export repository traits
pub use aliases::AliasRepository;
pub use messages::MessageRepository;
pub use transactions::TransactionRepository;
pub use users::UserRepository;
