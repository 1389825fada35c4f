//! Mashbox CLI - Plays a directory of episodes in a loop

mod cli;
mod logging;

use anyhow::{ Context, Result };
use clap::Parser;

use cli::Args;
use mashbox_core::{ Config, Supervisor };


#[tokio::main( flavor = "current_thread" )]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config_path()
        .context( "unable to resolve a config location, pass --config" )?;
    let config = Config::load( &config_path )?;

    logging::init( &config.log_file_path )?;

    tracing::info!(
        config = %config_path.display(),
        episode_dir = %config.episode_dir.display(),
        status_file = %config.status_file_path.display(),
        "Mashbox starting"
    );

    let mut supervisor = Supervisor::new( &config );
    supervisor.run_until( shutdown_signal() ).await?;

    tracing::info!( "Mashbox stopped" );
    Ok(())
}


/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err( e ) = tokio::signal::ctrl_c().await {
            tracing::warn!( error = %e, "Failed to listen for Ctrl+C" );
            std::future::pending::<()>().await;
        }
    };

    #[cfg( unix )]
    let terminate = async {
        use tokio::signal::unix::{ signal, SignalKind };

        match signal( SignalKind::terminate() ) {
            Ok( mut sigterm ) => {
                sigterm.recv().await;
            }
            Err( e ) => {
                tracing::warn!( error = %e, "Failed to listen for SIGTERM" );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg( not( unix ) )]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!( "Received Ctrl+C, shutting down" );
        },
        _ = terminate => {
            tracing::info!( "Received terminate signal, shutting down" );
        },
    }
}
