//! Episode catalog
//!
//! Lists the playable files of the episode directory in a stable order.
//! The directory is re-read on every call so that episodes added or
//! removed between plays are picked up.

use std::path::{ Path, PathBuf };

use thiserror::Error;
use tokio::fs;


/// Errors that can occur while listing the episode directory.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Episode directory not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Access denied: {0}" )]
    AccessDenied( PathBuf ),
}


/// A directory of episodes.
#[derive( Debug, Clone )]
pub struct Catalog {
    dir: PathBuf,
    extensions: Vec<String>,
}


impl Catalog {
    /// Creates a catalog over `dir`.
    ///
    /// When `extensions` is non-empty only files with one of those
    /// extensions (case-insensitive, without the dot) are listed.
    pub fn new( dir: impl Into<PathBuf>, extensions: &[String] ) -> Self {
        Self {
            dir: dir.into(),
            extensions: extensions.iter()
                .map( |e| e.trim_start_matches( '.' ).to_lowercase() )
                .collect(),
        }
    }


    /// Gets the episode directory.
    pub fn dir( &self ) -> &Path {
        &self.dir
    }


    /// Resolves an episode name to its full path.
    pub fn path_of( &self, episode: &str ) -> PathBuf {
        self.dir.join( episode )
    }


    /// Lists episode names sorted ascending by byte order.
    pub async fn list_entries( &self ) -> Result<Vec<String>, CatalogError> {
        let mut entries = match fs::read_dir( &self.dir ).await {
            Ok( e ) => e,
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err( CatalogError::NotFound( self.dir.clone() ) );
            }
            Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err( CatalogError::AccessDenied( self.dir.clone() ) );
            }
            Err( e ) => return Err( CatalogError::Io( e ) ),
        };

        let mut names = Vec::new();

        while let Some( entry ) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }

            let name = match entry.file_name().into_string() {
                Ok( name ) => name,
                Err( raw ) => {
                    tracing::warn!( name = ?raw, "Skipping episode with non UTF-8 name" );
                    continue;
                }
            };

            // Hidden files, including an in-progress state write
            if name.starts_with( '.' ) {
                continue;
            }

            if self.is_playable( &name ) {
                names.push( name );
            }
        }

        // String ordering is byte-wise on the UTF-8 encoding
        names.sort();
        Ok( names )
    }


    fn is_playable( &self, name: &str ) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        Path::new( name ).extension()
            .and_then( |e| e.to_str() )
            .map( |e| self.extensions.contains( &e.to_lowercase() ) )
            .unwrap_or( false )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn touch( dir: &Path, name: &str ) {
        std::fs::write( dir.join( name ), b"" ).unwrap();
    }


    #[tokio::test]
    async fn test_lists_sorted_by_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [ "ep10.mp4", "ep2.mp4", "Ep3.mp4", "ep1.mp4" ] {
            touch( tmp.path(), name );
        }

        let catalog = Catalog::new( tmp.path(), &[] );
        let entries = catalog.list_entries().await.unwrap();
        assert_eq!( entries, vec![ "Ep3.mp4", "ep1.mp4", "ep10.mp4", "ep2.mp4" ] );
    }


    #[tokio::test]
    async fn test_skips_directories() {
        let tmp = tempfile::tempdir().unwrap();
        touch( tmp.path(), "ep1.mp4" );
        std::fs::create_dir( tmp.path().join( "extras" ) ).unwrap();

        let catalog = Catalog::new( tmp.path(), &[] );
        assert_eq!( catalog.list_entries().await.unwrap(), vec![ "ep1.mp4" ] );
    }


    #[tokio::test]
    async fn test_skips_hidden_files() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [ "ep1.mp4", ".status.json.tmp", ".DS_Store" ] {
            touch( tmp.path(), name );
        }

        let catalog = Catalog::new( tmp.path(), &[] );
        assert_eq!( catalog.list_entries().await.unwrap(), vec![ "ep1.mp4" ] );
    }


    #[tokio::test]
    async fn test_extension_filter() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [ "ep1.MKV", "ep2.mp4", "notes.txt", "README" ] {
            touch( tmp.path(), name );
        }

        let catalog = Catalog::new( tmp.path(), &[ ".mkv".to_string(), "mp4".to_string() ] );
        assert_eq!( catalog.list_entries().await.unwrap(), vec![ "ep1.MKV", "ep2.mp4" ] );
    }


    #[tokio::test]
    async fn test_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::new( tmp.path(), &[] );
        assert!( catalog.list_entries().await.unwrap().is_empty() );
    }


    #[tokio::test]
    async fn test_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::new( tmp.path().join( "gone" ), &[] );
        let result = catalog.list_entries().await;
        assert!( matches!( result, Err( CatalogError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_path_of() {
        let catalog = Catalog::new( "/srv/episodes", &[] );
        assert_eq!( catalog.dir(), Path::new( "/srv/episodes" ) );
        assert_eq!( catalog.path_of( "ep1.mp4" ), PathBuf::from( "/srv/episodes/ep1.mp4" ) );
    }
}
