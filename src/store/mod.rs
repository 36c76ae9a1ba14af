//! Data store modules for Supabase integration

pub mod matches;
pub mod profiles;
pub mod supabase;

pub use matches::MatchStore;
pub use profiles::ProfileStore;
pub use supabase::{StoreError, SupabaseClient};
