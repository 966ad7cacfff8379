//! Gatehouse-DB: Database schema, migrations, and query operations
//!
//! SQLite via rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use gatehouse_db::pool::{init_pool, get_conn};
//! use gatehouse_db::queries::users;
//!
//! let pool = init_pool("/var/lib/gatehouse/gatehouse.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let user = users::create_user(&conn, "admin", "hash", true).unwrap();
//! println!("Created user: {}", user.username);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
