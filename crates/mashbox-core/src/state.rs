//! Persistent playback state
//!
//! A single JSON record remembering which episode is current, so that a
//! restart resumes where the last run left off. The record is always
//! replaced as a whole: the new content is written to a sibling temporary
//! file, flushed, and renamed over the old one.

use std::ffi::{ OsStr, OsString };
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value };
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;


/// Current on-disk record version.
pub const STATE_VERSION: u32 = 1;


/// Errors that can occur loading or saving playback state.
#[derive( Debug, Error )]
pub enum StateError {
    #[error( "No playback state at {0}" )]
    NotFound( PathBuf ),

    #[error( "Corrupt playback state at {path}: {source}" )]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error( "Playback state at {path} has unsupported version {version}" )]
    UnsupportedVersion {
        path: PathBuf,
        version: u32,
    },

    #[error( "Failed to encode playback state: {0}" )]
    Encode( #[source] serde_json::Error ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),
}


impl StateError {
    /// Returns true if no state has been persisted yet.
    pub fn is_not_found( &self ) -> bool {
        matches!( self, StateError::NotFound( _ ) )
    }
}


/// The persisted playback pointer.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct PlaybackState {
    /// Record version; absent in records written before versioning
    #[serde( default = "legacy_version" )]
    pub version: u32,

    /// File name of the current episode within the episode directory
    pub current_episode: String,

    /// Fields this version does not know about, kept so they survive a rewrite
    #[serde( flatten )]
    extra: Map<String, Value>,
}


fn legacy_version() -> u32 {
    1
}


/// Keys owned by the record itself; never stored as extra fields.
const RESERVED_KEYS: &[&str] = &[ "version", "currentEpisode" ];


impl PlaybackState {
    /// Creates a fresh state pointing at `episode`.
    pub fn new( episode: impl Into<String> ) -> Self {
        Self {
            version: STATE_VERSION,
            current_episode: episode.into(),
            extra: Map::new(),
        }
    }


    /// Returns a copy of this state pointing at `episode`, keeping any extra fields.
    pub fn with_episode( &self, episode: impl Into<String> ) -> Self {
        Self {
            version: STATE_VERSION,
            current_episode: episode.into(),
            extra: self.extra.clone(),
        }
    }


    /// Gets the fields carried through from newer or foreign writers.
    pub fn extra( &self ) -> &Map<String, Value> {
        &self.extra
    }


    /// Stores an extra field. Keys owned by the record are refused.
    ///
    /// @returns true if the field was stored
    pub fn insert_extra( &mut self, key: impl Into<String>, value: Value ) -> bool {
        let key = key.into();
        if RESERVED_KEYS.contains( &key.as_str() ) {
            return false;
        }
        self.extra.insert( key, value );
        true
    }
}


/// File-backed store for the playback state.
#[derive( Debug, Clone )]
pub struct StateStore {
    path: PathBuf,
}


impl StateStore {
    /// Creates a store persisting to `path`.
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self { path: path.into() }
    }


    /// Gets the state file path.
    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// Loads the persisted state.
    pub async fn load( &self ) -> Result<PlaybackState, StateError> {
        let bytes = match fs::read( &self.path ).await {
            Ok( b ) => b,
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err( StateError::NotFound( self.path.clone() ) );
            }
            Err( e ) => return Err( StateError::Io( e ) ),
        };

        let state: PlaybackState = serde_json::from_slice( &bytes ).map_err( |source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        } )?;

        if state.version > STATE_VERSION {
            return Err( StateError::UnsupportedVersion {
                path: self.path.clone(),
                version: state.version,
            } );
        }

        Ok( state )
    }


    /// Replaces the persisted state with `state`.
    pub async fn save( &self, state: &PlaybackState ) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty( state ).map_err( StateError::Encode )?;

        if let Some( parent ) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all( parent ).await?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = fs::File::create( &temp_path ).await?;
        file.write_all( &json ).await?;
        file.sync_all().await?;
        drop( file );

        fs::rename( &temp_path, &self.path ).await?;
        sync_parent_dir( &self.path ).await?;

        tracing::debug!( path = %self.path.display(), current_episode = %state.current_episode, "Saved playback state" );
        Ok(())
    }


    /// Sibling path used while writing, e.g. `.status.json.tmp`.
    fn temp_path( &self ) -> PathBuf {
        let mut name = OsString::from( "." );
        name.push( self.path.file_name().unwrap_or_else( || OsStr::new( "state" ) ) );
        name.push( ".tmp" );
        self.path.with_file_name( name )
    }
}


/// Flushes the directory entry of `path` so a completed rename survives power loss.
#[cfg( unix )]
async fn sync_parent_dir( path: &Path ) -> Result<(), StateError> {
    let parent = match path.parent() {
        Some( p ) if !p.as_os_str().is_empty() => p,
        _ => Path::new( "." ),
    };

    fs::File::open( parent ).await?.sync_all().await?;
    Ok(())
}


#[cfg( not( unix ) )]
async fn sync_parent_dir( _path: &Path ) -> Result<(), StateError> {
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    fn test_store() -> ( StateStore, TempDir ) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new( temp.path().join( "status.json" ) );
        ( store, temp )
    }


    #[tokio::test]
    async fn test_save_and_load() {
        let ( store, _temp ) = test_store();

        let state = PlaybackState::new( "ep1.mp4" );
        store.save( &state ).await.unwrap();

        assert_eq!( store.load().await.unwrap(), state );
    }


    #[tokio::test]
    async fn test_load_not_found() {
        let ( store, _temp ) = test_store();

        let err = store.load().await.unwrap_err();
        assert!( err.is_not_found() );
    }


    #[tokio::test]
    async fn test_load_corrupt() {
        let ( store, _temp ) = test_store();

        for contents in [ "", "{\"currentEpi", "[]", "{}", "{\"currentEpisode\": 4}", "null" ] {
            std::fs::write( store.path(), contents ).unwrap();
            let result = store.load().await;
            assert!(
                matches!( result, Err( StateError::Corrupt { .. } ) ),
                "expected corrupt for {:?}, got {:?}", contents, result
            );
        }
    }


    #[tokio::test]
    async fn test_load_legacy_record() {
        let ( store, _temp ) = test_store();
        std::fs::write( store.path(), r#"{"currentEpisode":"ep2.mp4"}"# ).unwrap();

        let state = store.load().await.unwrap();
        assert_eq!( state.version, 1 );
        assert_eq!( state.current_episode, "ep2.mp4" );
    }


    #[tokio::test]
    async fn test_load_future_version() {
        let ( store, _temp ) = test_store();
        std::fs::write( store.path(), r#"{"version":9,"currentEpisode":"ep2.mp4"}"# ).unwrap();

        let result = store.load().await;
        assert!( matches!( result, Err( StateError::UnsupportedVersion { version: 9, .. } ) ) );
    }


    #[tokio::test]
    async fn test_unknown_fields_survive_advance() {
        let ( store, _temp ) = test_store();
        std::fs::write( store.path(), r#"{"currentEpisode":"ep1.mp4","note":"keep me"}"# ).unwrap();

        let loaded = store.load().await.unwrap();
        store.save( &loaded.with_episode( "ep2.mp4" ) ).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!( reloaded.current_episode, "ep2.mp4" );
        assert_eq!( reloaded.extra().get( "note" ), Some( &Value::from( "keep me" ) ) );
    }


    #[tokio::test]
    async fn test_save_replaces_previous_record() {
        let ( store, _temp ) = test_store();

        store.save( &PlaybackState::new( "a-very-long-episode-name.mp4" ) ).await.unwrap();
        store.save( &PlaybackState::new( "b.mp4" ) ).await.unwrap();

        let contents = std::fs::read_to_string( store.path() ).unwrap();
        assert!( !contents.contains( "a-very-long" ) );
        assert_eq!( store.load().await.unwrap().current_episode, "b.mp4" );
    }


    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let ( store, temp ) = test_store();
        store.save( &PlaybackState::new( "ep1.mp4" ) ).await.unwrap();

        let names: Vec<_> = std::fs::read_dir( temp.path() ).unwrap()
            .map( |e| e.unwrap().file_name().into_string().unwrap() )
            .collect();
        assert_eq!( names, vec![ "status.json" ] );
    }


    #[tokio::test]
    async fn test_interrupted_write_keeps_last_saved_state() {
        let ( store, _temp ) = test_store();
        store.save( &PlaybackState::new( "ep1.mp4" ) ).await.unwrap();

        // A crash mid-write leaves only a truncated temp file behind
        std::fs::write( store.temp_path(), "{\"currentEpis" ).unwrap();

        let fresh = StateStore::new( store.path() );
        assert_eq!( fresh.load().await.unwrap().current_episode, "ep1.mp4" );

        // and the next save still succeeds over it
        fresh.save( &PlaybackState::new( "ep2.mp4" ) ).await.unwrap();
        assert_eq!( fresh.load().await.unwrap().current_episode, "ep2.mp4" );
    }


    #[tokio::test]
    async fn test_save_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new( temp.path().join( "nested" ).join( "status.json" ) );

        store.save( &PlaybackState::new( "ep1.mp4" ) ).await.unwrap();
        assert_eq!( store.load().await.unwrap().current_episode, "ep1.mp4" );
    }


    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value( PlaybackState::new( "ep1.mp4" ) ).unwrap();
        assert_eq!( json, serde_json::json!( { "version": 1, "currentEpisode": "ep1.mp4" } ) );
    }


    #[test]
    fn test_reserved_keys_are_not_extra() {
        let mut state = PlaybackState::new( "ep1.mp4" );
        assert!( !state.insert_extra( "currentEpisode", Value::from( "other.mp4" ) ) );
        assert!( !state.insert_extra( "version", Value::from( 7 ) ) );
        assert!( state.insert_extra( "note", Value::from( "kept" ) ) );
        assert_eq!( state.extra().len(), 1 );
    }


    #[tokio::test]
    async fn test_extra_fields_round_trip() {
        let ( store, _temp ) = test_store();

        let mut state = PlaybackState::new( "ep1.mp4" );
        state.insert_extra( "currentEpisode", Value::from( "shadow.mp4" ) );
        state.insert_extra( "note", Value::from( "kept" ) );
        store.save( &state ).await.unwrap();

        assert_eq!( store.load().await.unwrap(), state );
    }


    #[cfg( unix )]
    #[tokio::test]
    async fn test_sync_parent_dir() {
        let ( store, temp ) = test_store();
        store.save( &PlaybackState::new( "ep1.mp4" ) ).await.unwrap();

        sync_parent_dir( store.path() ).await.unwrap();
        sync_parent_dir( Path::new( "status.json" ) ).await.unwrap();

        let missing = temp.path().join( "gone" ).join( "status.json" );
        assert!( matches!( sync_parent_dir( &missing ).await, Err( StateError::Io( _ ) ) ) );
    }
}
