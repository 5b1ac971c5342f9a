//! Bootstrap CLI: create (or promote) the admin account directly against
//! the database. Prompts on stdin; same bcrypt cost as the server.

use folio_sdk::connect_pool;
use folio_sdk::server::auth::{insert_user_with_profile, Role, BCRYPT_COST};
use std::io::{BufRead, Write};
use tracing_subscriber::EnvFilter;

fn prompt(label: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{}: ", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/folio".into());
    let pool = connect_pool(&database_url).await?;

    let email = prompt("admin email")?;
    if !email.contains('@') {
        return Err("email must be a valid address".into());
    }
    let password = prompt("admin password")?;
    if password.len() < 8 {
        return Err("password must be at least 8 characters".into());
    }

    let hash = bcrypt::hash(&password, BCRYPT_COST)?;
    let existing: Option<(uuid::Uuid,)> =
        sqlx::query_as("SELECT id FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&pool)
            .await?;
    let id = match existing {
        Some((id,)) => {
            sqlx::query("UPDATE users SET password_hash = $1, role = 'admin' WHERE id = $2")
                .bind(&hash)
                .bind(id)
                .execute(&pool)
                .await?;
            println!("existing user promoted to admin");
            id
        }
        None => insert_user_with_profile(&pool, &email, &hash, Role::Admin).await?,
    };
    println!("admin ready: {} ({})", email, id);
    Ok(())
}
