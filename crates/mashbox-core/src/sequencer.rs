//! Episode sequencing
//!
//! Decides which episode plays next. The decision is a pure function of
//! the catalog and the current episode, so the same inputs always yield
//! the same step.

use thiserror::Error;


/// Errors that can occur when choosing the next episode.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum SequenceError {
    #[error( "Episode directory contains no playable files" )]
    EmptyCatalog,
}


/// Why a particular episode was chosen.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum StepReason {
    /// No previous episode; started at the top of the catalog.
    ColdStart,
    /// Moved to the episode after the current one.
    Advanced,
    /// The current episode was the last one; back to the first.
    Wrapped,
    /// The current episode is no longer in the catalog; back to the first.
    LostPosition,
}


/// Outcome of a sequencing decision.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Step {
    pub episode: String,
    pub reason: StepReason,
}


/// Chooses the episode following `current` in `catalog`.
///
/// `catalog` must already be sorted. Wraps around after the last entry,
/// and falls back to the first entry when `current` is absent or missing
/// from the catalog.
pub fn next_episode( catalog: &[String], current: Option<&str> ) -> Result<Step, SequenceError> {
    let first = catalog.first().ok_or( SequenceError::EmptyCatalog )?;

    let Some( current ) = current.filter( |c| !c.is_empty() ) else {
        tracing::info!( next_episode = %first, "No current episode, starting from the first" );
        return Ok( Step { episode: first.clone(), reason: StepReason::ColdStart } );
    };

    let Some( index ) = catalog.iter().position( |name| name == current ) else {
        tracing::warn!(
            current_episode = %current,
            dir_content_length = catalog.len(),
            "Could not find current episode, starting from the first"
        );
        return Ok( Step { episode: first.clone(), reason: StepReason::LostPosition } );
    };

    match catalog.get( index + 1 ) {
        Some( next ) => {
            tracing::info!(
                current_episode = %current,
                current_episode_index = index,
                dir_content_length = catalog.len(),
                next_episode = %next,
                "Getting next episode"
            );
            Ok( Step { episode: next.clone(), reason: StepReason::Advanced } )
        }
        None => {
            tracing::info!(
                current_episode = %current,
                current_episode_index = index,
                dir_content_length = catalog.len(),
                "Reached last episode, starting from the beginning"
            );
            Ok( Step { episode: first.clone(), reason: StepReason::Wrapped } )
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::io;
    use std::sync::{ Arc, Mutex };

    use serde_json::Value;


    /// Collects formatted log output in memory.
    #[derive( Clone, Default )]
    struct CapturedLog( Arc<Mutex<Vec<u8>>> );


    impl io::Write for CapturedLog {
        fn write( &mut self, data: &[u8] ) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice( data );
            Ok( data.len() )
        }


        fn flush( &mut self ) -> io::Result<()> {
            Ok(())
        }
    }


    /// Runs `f` and returns the events it logged, one JSON object each.
    fn capture_events<T>( f: impl FnOnce() -> T ) -> ( T, Vec<Value> ) {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level( tracing::Level::TRACE )
            .with_writer( move || writer.clone() )
            .finish();

        let result = tracing::subscriber::with_default( subscriber, f );

        let bytes = log.0.lock().unwrap().clone();
        let events = String::from_utf8( bytes ).unwrap()
            .lines()
            .map( |line| serde_json::from_str( line ).unwrap() )
            .collect();
        ( result, events )
    }


    fn warnings( events: &[Value] ) -> Vec<&Value> {
        events.iter().filter( |e| e[ "level" ] == "WARN" ).collect()
    }


    fn abc() -> Vec<String> {
        vec![ "A".to_string(), "B".to_string(), "C".to_string() ]
    }


    #[test]
    fn test_simple_advance() {
        let step = next_episode( &abc(), Some( "B" ) ).unwrap();
        assert_eq!( step, Step { episode: "C".to_string(), reason: StepReason::Advanced } );
    }


    #[test]
    fn test_wraparound() {
        let step = next_episode( &abc(), Some( "C" ) ).unwrap();
        assert_eq!( step, Step { episode: "A".to_string(), reason: StepReason::Wrapped } );
    }


    #[test]
    fn test_cold_start() {
        let step = next_episode( &abc(), None ).unwrap();
        assert_eq!( step, Step { episode: "A".to_string(), reason: StepReason::ColdStart } );
    }


    #[test]
    fn test_empty_current_is_cold_start() {
        let step = next_episode( &abc(), Some( "" ) ).unwrap();
        assert_eq!( step.reason, StepReason::ColdStart );
        assert_eq!( step.episode, "A" );
    }


    #[test]
    fn test_lost_position_falls_back_to_first() {
        let step = next_episode( &abc(), Some( "Z" ) ).unwrap();
        assert_eq!( step, Step { episode: "A".to_string(), reason: StepReason::LostPosition } );
    }


    #[test]
    fn test_single_entry_wraps_to_itself() {
        let catalog = vec![ "only.mkv".to_string() ];
        let step = next_episode( &catalog, Some( "only.mkv" ) ).unwrap();
        assert_eq!( step, Step { episode: "only.mkv".to_string(), reason: StepReason::Wrapped } );
    }


    #[test]
    fn test_empty_catalog_fails() {
        assert_eq!( next_episode( &[], None ), Err( SequenceError::EmptyCatalog ) );
        assert_eq!( next_episode( &[], Some( "A" ) ), Err( SequenceError::EmptyCatalog ) );
    }


    #[test]
    fn test_deterministic() {
        let catalog = abc();
        for current in [ None, Some( "A" ), Some( "B" ), Some( "C" ), Some( "Z" ) ] {
            let first = next_episode( &catalog, current ).unwrap();
            for _ in 0..10 {
                assert_eq!( next_episode( &catalog, current ).unwrap(), first );
            }
        }
    }


    #[test]
    fn test_full_rotation_visits_every_entry() {
        let catalog = abc();
        let mut current = next_episode( &catalog, None ).unwrap().episode;
        let mut seen = vec![ current.clone() ];
        for _ in 0..catalog.len() {
            current = next_episode( &catalog, Some( &current ) ).unwrap().episode;
            seen.push( current.clone() );
        }
        assert_eq!( seen, vec![ "A", "B", "C", "A" ] );
    }


    #[test]
    fn test_lost_position_logs_warning() {
        let ( step, events ) = capture_events( || next_episode( &abc(), Some( "Z" ) ) );
        assert_eq!( step.unwrap().episode, "A" );

        let warnings = warnings( &events );
        assert_eq!( warnings.len(), 1 );
        assert_eq!( warnings[ 0 ][ "fields" ][ "current_episode" ], "Z" );
    }


    #[test]
    fn test_regular_steps_log_no_warning() {
        for current in [ None, Some( "A" ), Some( "C" ) ] {
            let ( step, events ) = capture_events( || next_episode( &abc(), current ) );
            assert!( step.is_ok() );
            assert!( !events.is_empty() );
            assert!( warnings( &events ).is_empty(), "unexpected warning for {:?}", current );
        }
    }
}
