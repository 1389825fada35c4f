//! Event log setup
//!
//! Every event goes to two places: a readable line on stderr, and a JSON
//! object appended to the configured log file. The file is only ever
//! appended to.

use std::fs::{ self, File, OpenOptions };
use std::path::Path;
use std::sync::Mutex;

use anyhow::{ Context, Result };
use tracing::Subscriber;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};


/// Installs the global subscriber, appending JSON lines to `log_file_path`.
pub fn init( log_file_path: &Path ) -> Result<()> {
    let file = open_log_file( log_file_path )?;

    let terminal_layer = fmt::layer()
        .with_target( false )
        .with_writer( std::io::stderr )
        .with_filter( env_filter() );

    tracing_subscriber::registry()
        .with( terminal_layer )
        .with( file_layer( file ).with_filter( env_filter() ) )
        .try_init()
        .context( "failed to install log subscriber" )?;

    Ok(())
}


/// Level from `RUST_LOG`, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) )
}


/// One JSON object per line: `timestamp`, `level` and the event `fields`.
fn file_layer<S>( file: File ) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_current_span( false )
        .with_span_list( false )
        .with_writer( Mutex::new( file ) )
}


fn open_log_file( path: &Path ) -> Result<File> {
    if let Some( parent ) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all( parent ).with_context( || {
                format!( "failed to create log directory {}", parent.display() )
            } )?;
        }
    }

    OpenOptions::new()
        .create( true )
        .append( true )
        .open( path )
        .with_context( || format!( "failed to open log file {}", path.display() ) )
}


#[cfg( test )]
mod tests {
    use super::*;

    use serde_json::Value;


    #[test]
    fn test_file_layer_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "logs" ).join( "mashbox.log" );
        fs::create_dir_all( path.parent().unwrap() ).unwrap();
        fs::write( &path, "earlier line\n" ).unwrap();

        let subscriber = tracing_subscriber::registry()
            .with( file_layer( open_log_file( &path ).unwrap() ) );

        tracing::subscriber::with_default( subscriber, || {
            tracing::info!( episode = "ep1.mp4", "Launching player" );
            tracing::warn!( stream = "stderr", line = "oops", "Player output" );
        } );

        let contents = fs::read_to_string( &path ).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!( lines.len(), 3 );
        assert_eq!( lines[ 0 ], "earlier line" );

        let first: Value = serde_json::from_str( lines[ 1 ] ).unwrap();
        assert!( first.get( "timestamp" ).is_some() );
        assert_eq!( first[ "fields" ][ "message" ], "Launching player" );
        assert_eq!( first[ "fields" ][ "episode" ], "ep1.mp4" );

        let second: Value = serde_json::from_str( lines[ 2 ] ).unwrap();
        assert_eq!( second[ "level" ], "WARN" );
        assert_eq!( second[ "fields" ][ "stream" ], "stderr" );
    }


    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "a" ).join( "b" ).join( "mashbox.log" );

        open_log_file( &path ).unwrap();
        assert!( path.is_file() );
    }
}
