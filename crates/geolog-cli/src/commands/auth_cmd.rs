use geolog_core::config::ClientConfig;

use crate::auth::auth_client;
use crate::cli::AuthCommands;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, config: &ClientConfig) -> Result<(), CliError> {
    let client = auth_client(config)?;
    match command {
        AuthCommands::Register { email, password } => {
            let session = client.register(&email, &password).await?;
            println!(
                "Registered and signed in as {} on {}",
                session.user.email, config.api_base_url
            );
        }
        AuthCommands::Login { email, password } => {
            let session = client.login(&email, &password).await?;
            println!(
                "Signed in as {} on {}",
                session.user.email, config.api_base_url
            );
        }
        AuthCommands::Status => match client.current_session()? {
            Some(session) => println!(
                "Signed in as {} (user {}) on {}",
                session.user.email, session.user.id, config.api_base_url
            ),
            None => println!("Not signed in on {}", config.api_base_url),
        },
        AuthCommands::Logout => {
            client.logout()?;
            println!("Signed out of {}", config.api_base_url);
        }
    }
    Ok(())
}
