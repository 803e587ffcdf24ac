//! User account commands

use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use grc_core::validation::{optional, required};
use grc_core::UserRole;
use grc_server::db::repos::users::NewUser;
use grc_server::db::UserRepo;
use grc_server::http::auth::hash_password;
use grc_server::http::routes::users::{validate_email, validate_password};

use super::Context;

const NAME_MAX: usize = 100;

#[derive(Parser, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create a user account
    Create(CreateUserArgs),
}

#[derive(Args, Debug)]
pub struct CreateUserArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub first_name: String,

    #[arg(long)]
    pub last_name: String,

    #[arg(long)]
    pub department: Option<String>,

    #[arg(long)]
    pub job_title: Option<String>,

    /// ITUser, GRCUser or Admin
    #[arg(long, default_value = "ITUser")]
    pub role: UserRole,

    /// Initial password
    #[arg(long, env = "GRC_USER_PASSWORD", hide_env_values = true)]
    pub password: String,
}

impl CreateUserArgs {
    fn into_new_user(self) -> Result<NewUser> {
        validate_password(&self.password)?;
        let password_hash = hash_password(&self.password).map_err(|e| anyhow!("Failed to hash password: {:?}", e))?;
        Ok(NewUser {
            email: validate_email(&self.email)?,
            first_name: required("first name", &self.first_name, NAME_MAX)?,
            last_name: required("last name", &self.last_name, NAME_MAX)?,
            department: optional("department", self.department.as_deref(), NAME_MAX)?,
            job_title: optional("job title", self.job_title.as_deref(), NAME_MAX)?,
            role: self.role,
            password_hash,
        })
    }
}

pub async fn run_user(ctx: &Context, args: UserArgs) -> Result<()> {
    match args.command {
        UserCommand::Create(create) => {
            let new = create.into_new_user()?;
            let pool = ctx.pool().await?;
            let user = UserRepo::new(&pool)
                .create(new)
                .await
                .context("Failed to create user")?;
            tracing::info!(user = %user.email, role = %user.role, "user created");
            println!("Created {} ({}) {}", user.email, user.role, user.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(password: &str) -> CreateUserArgs {
        CreateUserArgs {
            email: " Admin@Example.com ".into(),
            first_name: "Ada".into(),
            last_name: "Admin".into(),
            department: None,
            job_title: Some(" ".into()),
            role: UserRole::Admin,
            password: password.into(),
        }
    }

    #[test]
    fn builds_hashed_user() {
        let new = args("correct horse battery").into_new_user().unwrap();
        assert_eq!(new.email, "admin@example.com");
        assert_eq!(new.job_title, None);
        assert!(new.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn short_password_is_rejected() {
        assert!(args("short").into_new_user().is_err());
    }
}
