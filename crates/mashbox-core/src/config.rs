//! Static configuration
//!
//! Loaded once at startup from a JSON file and handed to each component.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use thiserror::Error;


/// Errors that can occur while loading configuration.
#[derive( Debug, Error )]
pub enum ConfigError {
    #[error( "Failed to read config {path}: {source}" )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Failed to parse config {path}: {source}" )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error( "Invalid config: {0}" )]
    Invalid( String ),
}


/// Mashbox configuration.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct Config {
    /// Directory scanned for episodes
    pub episode_dir: PathBuf,

    /// Location of the persisted playback state
    pub status_file_path: PathBuf,

    /// Append-only event log destination
    pub log_file_path: PathBuf,

    /// Player binary
    pub vlc_executable_path: PathBuf,

    /// Extra player arguments, appended after the media path
    #[serde( default )]
    pub vlc_options: Vec<String>,

    /// File extensions considered playable. Empty means every file.
    #[serde( default )]
    pub extensions: Vec<String>,
}


impl Config {
    /// File name looked up in the working directory and the config directory.
    pub const FILE_NAME: &'static str = "config.json";


    /// Loads and validates configuration from a JSON file.
    pub fn load( path: &Path ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string( path ).map_err( |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        } )?;

        Self::from_json( &contents ).map_err( |e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        } )
    }


    /// Parses and validates configuration from a JSON string.
    pub fn from_json( contents: &str ) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str( contents ).map_err( |source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        } )?;
        config.validate()?;
        Ok( config )
    }


    /// Returns the platform default config location, e.g. `~/.config/mashbox/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "mashbox" ).join( Self::FILE_NAME ) )
    }


    fn validate( &self ) -> Result<(), ConfigError> {
        let required = [
            ( "episodeDir", &self.episode_dir ),
            ( "statusFilePath", &self.status_file_path ),
            ( "logFilePath", &self.log_file_path ),
            ( "vlcExecutablePath", &self.vlc_executable_path ),
        ];

        for ( key, value ) in required {
            if value.as_os_str().is_empty() {
                return Err( ConfigError::Invalid( format!( "{} must not be empty", key ) ) );
            }
        }

        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    const FULL: &str = r#"{
        "episodeDir": "/srv/episodes",
        "statusFilePath": "/var/lib/mashbox/status.json",
        "logFilePath": "/var/log/mashbox.log",
        "vlcExecutablePath": "/usr/bin/cvlc",
        "vlcOptions": ["--fullscreen", "--play-and-exit"]
    }"#;


    #[test]
    fn test_parse_full() {
        let config = Config::from_json( FULL ).unwrap();
        assert_eq!( config.episode_dir, PathBuf::from( "/srv/episodes" ) );
        assert_eq!( config.vlc_executable_path, PathBuf::from( "/usr/bin/cvlc" ) );
        assert_eq!( config.vlc_options, vec![ "--fullscreen", "--play-and-exit" ] );
        assert!( config.extensions.is_empty() );
    }


    #[test]
    fn test_options_default_to_empty() {
        let config = Config::from_json( r#"{
            "episodeDir": "eps",
            "statusFilePath": "status.json",
            "logFilePath": "log.txt",
            "vlcExecutablePath": "vlc",
            "somethingElse": 3
        }"# ).unwrap();
        assert!( config.vlc_options.is_empty() );
    }


    #[test]
    fn test_missing_key_is_parse_error() {
        let result = Config::from_json( r#"{ "episodeDir": "eps" }"# );
        assert!( matches!( result, Err( ConfigError::Parse { .. } ) ) );
    }


    #[test]
    fn test_empty_path_is_invalid() {
        let result = Config::from_json( r#"{
            "episodeDir": "",
            "statusFilePath": "status.json",
            "logFilePath": "log.txt",
            "vlcExecutablePath": "vlc"
        }"# );
        assert!( matches!( result, Err( ConfigError::Invalid( _ ) ) ) );
    }


    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "config.json" );
        fs::write( &path, "{ not json" ).unwrap();

        match Config::load( &path ) {
            Err( ConfigError::Parse { path: reported, .. } ) => assert_eq!( reported, path ),
            other => panic!( "expected parse error, got {:?}", other ),
        }
    }


    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load( &dir.path().join( "absent.json" ) );
        assert!( matches!( result, Err( ConfigError::Io { .. } ) ) );
    }
}
