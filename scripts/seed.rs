//! Seed script for the notes store
//!
//! Clears the database and creates two free-plan tenants, each with an admin
//! and a member account (password `password`).
//! Run: cargo run --bin seed

use tenant_notes::auth::hash_password;
use tenant_notes::config::Config;
use tenant_notes::logging;
use tenant_notes::models::{Role, Tenant, User};
use tenant_notes::storage::Storage;
use tracing::info;

const DEMO_PASSWORD: &str = "password";

const TENANTS: [(&str, &str); 2] = [("Acme Corporation", "acme"), ("Globex Corporation", "globex")];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let _log_guard = logging::init(&config.log)?;

    let storage = Storage::open(&config.database_path)?;
    storage.clear()?;
    info!(path = %config.database_path, "cleared existing data");

    let password_hash = hash_password(DEMO_PASSWORD, config.bcrypt_cost)?;
    let mut accounts = Vec::new();

    for (name, slug) in TENANTS {
        let tenant = Tenant::new(name, slug);
        storage.create_tenant(&tenant)?;
        info!(%slug, "created tenant");

        for (local, role) in [("admin", Role::Admin), ("user", Role::Member)] {
            let user = User::new(&format!("{local}@{slug}.test"), password_hash.clone(), role, tenant.id);
            storage.create_user(&user)?;
            accounts.push((user.email, role, name));
        }
    }
    storage.flush()?;

    println!("Database seeded successfully!\n\nTest accounts (password: {DEMO_PASSWORD}):");
    for (email, role, tenant) in accounts {
        println!("  {email:<20} {role:?}, {tenant}");
    }
    Ok(())
}
