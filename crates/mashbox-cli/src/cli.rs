//! Command-line argument parsing for Mashbox.

use std::path::{ Path, PathBuf };

use clap::Parser;

use mashbox_core::Config;


/// Mashbox - Plays a directory of episodes in a loop, resuming after restarts.
#[derive( Parser, Debug )]
#[command( name = "mashbox" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Config file to load.
    ///
    /// Defaults to ./config.json, then the platform config directory.
    #[arg( short, long )]
    pub config: Option<PathBuf>,
}


impl Args {
    /// Resolves which config file to load.
    pub fn config_path( &self ) -> Option<PathBuf> {
        resolve_config_path( self.config.clone(), Path::new( "." ) )
    }
}


fn resolve_config_path( explicit: Option<PathBuf>, working_dir: &Path ) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    let local = working_dir.join( Config::FILE_NAME );
    if local.is_file() {
        return Some( local );
    }

    Config::default_path()
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_config_flag() {
        let args = Args::try_parse_from( [ "mashbox", "--config", "/etc/mashbox.json" ] ).unwrap();
        assert_eq!( args.config, Some( PathBuf::from( "/etc/mashbox.json" ) ) );
    }


    #[test]
    fn test_no_args() {
        let args = Args::try_parse_from( [ "mashbox" ] ).unwrap();
        assert_eq!( args.config, None );
    }


    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "config.json" ), "{}" ).unwrap();

        let resolved = resolve_config_path( Some( PathBuf::from( "other.json" ) ), dir.path() );
        assert_eq!( resolved, Some( PathBuf::from( "other.json" ) ) );
    }


    #[test]
    fn test_working_directory_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "config.json" ), "{}" ).unwrap();

        let resolved = resolve_config_path( None, dir.path() );
        assert_eq!( resolved, Some( dir.path().join( "config.json" ) ) );
    }


    #[test]
    fn test_falls_back_to_platform_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!( resolve_config_path( None, dir.path() ), Config::default_path() );
    }
}
