// Bootstrap an admin account, or promote an existing account to admin.
//
// Usage: create_admin [email] [password] [name]

use chrono::Utc;

use fer_site_api::auth::hash_password;
use fer_site_api::config;
use fer_site_api::models::{Account, AccountRole};
use fer_site_api::storage::{create_storage_backend, StorageError};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let email = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "admin@fer.com".to_string())
        .trim()
        .to_lowercase();
    let password = args.get(2).cloned().unwrap_or_else(|| "admin123".to_string());
    let name = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| "Admin User".to_string());

    let config = config::load_config_with_fallback();

    let store = match create_storage_backend(&config.storage).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Failed to initialize storage backend: {}", err);
            std::process::exit(1);
        }
    };
    println!("Connected to storage backend");

    // Promote an existing account instead of creating a duplicate
    match store.find_account_by_email(&email).await {
        Ok(Some(mut account)) => {
            if account.role == AccountRole::Admin {
                println!("User is already an admin.");
                return;
            }

            account.role = AccountRole::Admin;
            account.touch(Utc::now());

            match store.update_account(account).await {
                Ok(account) => {
                    println!("User updated to admin role!");
                    println!("Email: {}", account.email);
                }
                Err(err) => {
                    eprintln!("Failed to update account: {}", err);
                    std::process::exit(1);
                }
            }
            return;
        }
        Ok(None) => {}
        Err(err) => {
            eprintln!("Failed to look up account: {}", err);
            std::process::exit(1);
        }
    }

    let password_hash = match hash_password(&password) {
        Ok(hash) => hash,
        Err(err) => {
            eprintln!("Failed to hash password: {}", err);
            std::process::exit(1);
        }
    };

    let account = Account::new(name, email, password_hash, AccountRole::Admin, Utc::now());

    match store.insert_account(account.clone()).await {
        Ok(()) => {
            println!("Admin user created successfully!");
            println!("Email: {}", account.email);
            println!("Role: admin");
        }
        Err(StorageError::AlreadyExists) => {
            eprintln!("An account already exists for {}", account.email);
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to create admin account: {}", err);
            std::process::exit(1);
        }
    }
}
