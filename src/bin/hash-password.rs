//! Print a bcrypt hash for the seeded admin account.

use bcrypt::{hash, DEFAULT_COST};
use std::env;

const MIN_PASSWORD_LENGTH: usize = 8;

fn main() {
    let password = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD>");
        std::process::exit(1);
    });

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        eprintln!(
            "Refusing to hash a password shorter than {} characters",
            MIN_PASSWORD_LENGTH
        );
        std::process::exit(1);
    }

    match hash(&password, DEFAULT_COST) {
        Ok(hashed) => {
            println!("Cost : {}", DEFAULT_COST);
            println!("Hash : {}\n", hashed);
            println!("# Add to .env together with ADMIN_EMAIL:");
            println!("ADMIN_PASSWORD_HASH={}", hashed);
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    }
}
