//! Playback supervisor
//!
//! Runs the external player for the current episode, forwards its output
//! to the event log, and on exit advances and persists the playback state
//! before launching the next episode. Exactly one player runs at a time:
//! the next launch only happens after the previous one has been reaped.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ ExitStatus, Stdio };

use thiserror::Error;
use tokio::io::{ AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader };
use tokio::process::{ Child, Command };
use tokio::task::JoinHandle;

use crate::catalog::{ Catalog, CatalogError };
use crate::config::Config;
use crate::sequencer::{ next_episode, SequenceError };
use crate::state::{ PlaybackState, StateError, StateStore };


/// Errors that stop the supervisor.
#[derive( Debug, Error )]
pub enum SupervisorError {
    #[error( "Catalog error: {0}" )]
    Catalog( #[from] CatalogError ),

    #[error( "Sequencing error: {0}" )]
    Sequence( #[from] SequenceError ),

    #[error( "State error: {0}" )]
    State( #[from] StateError ),

    #[error( "Failed to launch player {path}: {source}" )]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error( "Failed to wait for player: {0}" )]
    Wait( #[source] std::io::Error ),
}


/// Supervisor lifecycle phase.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Phase {
    #[default]
    Idle,
    Launching,
    Playing,
    Terminated,
}


/// How a finished player ended.
#[derive( Debug, Clone, Copy )]
pub struct PlayerExit {
    pub status: ExitStatus,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}


/// Result of a single playback cycle.
#[derive( Debug, Clone, Copy )]
pub enum CycleOutcome {
    /// The player stopped on its own (clean exit, crash or signal).
    Exited( PlayerExit ),
    /// Shutdown was requested and the player was killed.
    Shutdown,
}


/// A launched player and the tasks forwarding its output.
struct RunningPlayer {
    child: Child,
    stdout: Option<JoinHandle<usize>>,
    stderr: Option<JoinHandle<usize>>,
}


/// Drives the play → advance → play loop.
pub struct Supervisor {
    catalog: Catalog,
    store: StateStore,
    player: PathBuf,
    options: Vec<String>,
    phase: Phase,
}


impl Supervisor {
    /// Creates a supervisor from configuration.
    pub fn new( config: &Config ) -> Self {
        Self {
            catalog: Catalog::new( &config.episode_dir, &config.extensions ),
            store: StateStore::new( &config.status_file_path ),
            player: config.vlc_executable_path.clone(),
            options: config.vlc_options.clone(),
            phase: Phase::Idle,
        }
    }


    /// Gets the current phase.
    pub fn phase( &self ) -> Phase {
        self.phase
    }


    /// Gets the episode catalog.
    pub fn catalog( &self ) -> &Catalog {
        &self.catalog
    }


    /// Gets the state store.
    pub fn store( &self ) -> &StateStore {
        &self.store
    }


    /// Loads the persisted state, initializing it on first run.
    ///
    /// Only a missing state file triggers initialization; any other load
    /// failure is returned so that corruption is never mistaken for a
    /// first run.
    pub async fn bootstrap( &self ) -> Result<PlaybackState, SupervisorError> {
        match self.store.load().await {
            Ok( state ) if state.current_episode.is_empty() => {
                tracing::warn!( "Saved state has no current episode, initializing state" );
                let entries = self.catalog.list_entries().await?;
                let step = next_episode( &entries, None )?;
                let state = state.with_episode( step.episode );
                self.store.save( &state ).await?;
                Ok( state )
            }
            Ok( state ) => {
                tracing::info!( current_episode = %state.current_episode, "Resuming from saved state" );
                Ok( state )
            }
            Err( e ) if e.is_not_found() => {
                tracing::info!( error = %e, "State file not found, initializing state" );
                let entries = self.catalog.list_entries().await?;
                let step = next_episode( &entries, None )?;
                let state = PlaybackState::new( step.episode );
                self.store.save( &state ).await?;
                Ok( state )
            }
            Err( e ) => {
                tracing::error!( error = %e, "Unexpected error reading state" );
                Err( e.into() )
            }
        }
    }


    /// Plays the episode in `state` until the player exits.
    pub async fn play( &mut self, state: &PlaybackState ) -> Result<PlayerExit, SupervisorError> {
        let mut running = self.launch( state )?;
        let status = running.child.wait().await.map_err( SupervisorError::Wait )?;
        Ok( self.reap( state, running, status ).await )
    }


    /// Plays the episode in `state` until the player exits or `shutdown` resolves.
    ///
    /// On shutdown the player is killed and the state is left untouched.
    pub async fn play_until<F>( &mut self, state: &PlaybackState, shutdown: F ) -> Result<CycleOutcome, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let mut running = self.launch( state )?;

        tokio::pin!( shutdown );

        let status = tokio::select! {
            biased;

            _ = &mut shutdown => None,
            status = running.child.wait() => Some( status.map_err( SupervisorError::Wait )? ),
        };

        match status {
            Some( status ) => Ok( CycleOutcome::Exited( self.reap( state, running, status ).await ) ),
            None => {
                self.stop( state, running ).await;
                Ok( CycleOutcome::Shutdown )
            }
        }
    }


    /// Spawns the player for `state` and starts forwarding its output.
    fn launch( &mut self, state: &PlaybackState ) -> Result<RunningPlayer, SupervisorError> {
        let path = self.catalog.path_of( &state.current_episode );

        self.set_phase( Phase::Launching );
        tracing::info!(
            episode = %state.current_episode,
            path = %path.display(),
            player = %self.player.display(),
            "Launching player"
        );

        let mut command = Command::new( &self.player );
        command.arg( &path )
            .args( &self.options )
            .stdin( Stdio::null() )
            .stdout( Stdio::piped() )
            .stderr( Stdio::piped() )
            .kill_on_drop( true );

        // Keep terminal signals aimed at us from reaching the player directly
        #[cfg( unix )]
        command.process_group( 0 );

        let mut child = match command.spawn() {
            Ok( c ) => c,
            Err( source ) => {
                self.set_phase( Phase::Idle );
                return Err( SupervisorError::Launch { path: self.player.clone(), source } );
            }
        };

        self.set_phase( Phase::Playing );

        let stdout = child.stdout.take().map( |out| tokio::spawn( forward_output( out, "stdout" ) ) );
        let stderr = child.stderr.take().map( |err| tokio::spawn( forward_output( err, "stderr" ) ) );

        Ok( RunningPlayer { child, stdout, stderr } )
    }


    /// Drains the output forwarders of a player that exited on its own.
    async fn reap( &mut self, state: &PlaybackState, running: RunningPlayer, status: ExitStatus ) -> PlayerExit {
        let stdout_lines = join_forwarder( running.stdout ).await;
        let stderr_lines = join_forwarder( running.stderr ).await;

        self.set_phase( Phase::Terminated );

        tracing::info!(
            episode = %state.current_episode,
            %status,
            code = ?status.code(),
            stdout_lines,
            stderr_lines,
            "Player exited"
        );

        PlayerExit { status, stdout_lines, stderr_lines }
    }


    /// Kills a player whose run was cut short.
    async fn stop( &mut self, state: &PlaybackState, mut running: RunningPlayer ) {
        tracing::info!( episode = %state.current_episode, "Shutdown requested, stopping player" );
        if let Err( e ) = running.child.kill().await {
            tracing::warn!( error = %e, "Failed to kill player" );
        }

        // Anything the player forked may still hold the pipes open
        for handle in [ running.stdout, running.stderr ].into_iter().flatten() {
            handle.abort();
        }

        self.set_phase( Phase::Terminated );
    }


    /// Computes and persists the state following `state`.
    pub async fn advance( &self, state: &PlaybackState ) -> Result<PlaybackState, SupervisorError> {
        let entries = self.catalog.list_entries().await?;
        let step = next_episode( &entries, Some( &state.current_episode ) )?;
        let new_state = state.with_episode( step.episode );

        tracing::info!(
            current_episode = %state.current_episode,
            new_episode = %new_state.current_episode,
            reason = ?step.reason,
            "Iterated to new episode"
        );

        self.store.save( &new_state ).await?;
        Ok( new_state )
    }


    /// Plays forever, one episode after another.
    pub async fn run( &mut self ) -> Result<(), SupervisorError> {
        self.run_until( std::future::pending::<()>() ).await
    }


    /// Plays one episode after another until `shutdown` resolves.
    ///
    /// A stop does not advance the state, so the next start replays the
    /// interrupted episode.
    pub async fn run_until<F>( &mut self, shutdown: F ) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let result = self.run_loop( shutdown ).await;
        if let Err( e ) = &result {
            tracing::error!( error = %e, "Playback stopped on fatal error" );
        }
        self.set_phase( Phase::Idle );
        result
    }


    async fn run_loop<F>( &mut self, shutdown: F ) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let mut state = self.bootstrap().await?;
        tokio::pin!( shutdown );

        loop {
            match self.play_until( &state, &mut shutdown ).await? {
                CycleOutcome::Exited( _ ) => {
                    state = self.advance( &state ).await?;
                }
                CycleOutcome::Shutdown => {
                    tracing::info!( current_episode = %state.current_episode, "Stopped; will resume this episode" );
                    return Ok(());
                }
            }
        }
    }


    fn set_phase( &mut self, phase: Phase ) {
        if self.phase != phase {
            tracing::debug!( from = ?self.phase, to = ?phase, "Supervisor phase" );
            self.phase = phase;
        }
    }
}


/// Longest chunk of player output logged as one line.
const MAX_LINE_BYTES: u64 = 8 * 1024;


/// Forwards each line of player output to the event log.
///
/// Lines longer than [`MAX_LINE_BYTES`] are split. Returns the number of
/// lines forwarded.
async fn forward_output<R>( reader: R, stream: &'static str ) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new( reader );
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match ( &mut reader ).take( MAX_LINE_BYTES ).read_until( b'\n', &mut buf ).await {
            Ok( 0 ) => break,
            Ok( _ ) => {
                let line = String::from_utf8_lossy( &buf );
                let line = line.trim_end_matches( &[ '\r', '\n' ][ .. ] );
                tracing::info!( target: "mashbox::player", stream, line, "Player output" );
                count += 1;
            }
            Err( e ) => {
                tracing::warn!( stream, error = %e, "Failed to read player output" );
                break;
            }
        }
    }

    count
}


async fn join_forwarder( handle: Option<JoinHandle<usize>> ) -> usize {
    let Some( handle ) = handle else {
        return 0;
    };

    match handle.await {
        Ok( count ) => count,
        Err( e ) => {
            tracing::warn!( error = %e, "Player output forwarder failed" );
            0
        }
    }
}


#[cfg( all( test, unix ) )]
mod tests {
    use super::*;

    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;


    /// Builds a config whose "player" is `sh`, so each episode file is a shell script.
    fn sh_config( root: &Path ) -> Config {
        let episode_dir = root.join( "episodes" );
        std::fs::create_dir_all( &episode_dir ).unwrap();
        Config {
            episode_dir,
            status_file_path: root.join( "status.json" ),
            log_file_path: root.join( "mashbox.log" ),
            vlc_executable_path: PathBuf::from( "sh" ),
            vlc_options: Vec::new(),
            extensions: Vec::new(),
        }
    }


    fn write_episode( config: &Config, name: &str, script: &str ) {
        std::fs::write( config.episode_dir.join( name ), script ).unwrap();
    }


    fn saved_episode( config: &Config ) -> String {
        let raw = std::fs::read_to_string( &config.status_file_path ).unwrap();
        let value: serde_json::Value = serde_json::from_str( &raw ).unwrap();
        value[ "currentEpisode" ].as_str().unwrap().to_string()
    }


    #[tokio::test]
    async fn test_end_to_end_rotation() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1.mp4", "echo playing one" );
        write_episode( &config, "ep2.mp4", "echo playing two" );

        let mut supervisor = Supervisor::new( &config );

        let state = supervisor.bootstrap().await.unwrap();
        assert_eq!( state.current_episode, "ep1.mp4" );
        assert_eq!( saved_episode( &config ), "ep1.mp4" );

        let exit = supervisor.play( &state ).await.unwrap();
        assert!( exit.status.success() );
        assert_eq!( exit.stdout_lines, 1 );
        assert_eq!( supervisor.phase(), Phase::Terminated );

        let state = supervisor.advance( &state ).await.unwrap();
        assert_eq!( state.current_episode, "ep2.mp4" );
        assert_eq!( saved_episode( &config ), "ep2.mp4" );

        supervisor.play( &state ).await.unwrap();
        let state = supervisor.advance( &state ).await.unwrap();
        assert_eq!( state.current_episode, "ep1.mp4" );
        assert_eq!( saved_episode( &config ), "ep1.mp4" );
    }


    #[tokio::test]
    async fn test_failed_player_still_advances() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "a", "echo out; echo oops >&2; echo again >&2; exit 3" );
        write_episode( &config, "b", "exit 0" );

        let mut supervisor = Supervisor::new( &config );
        let state = supervisor.bootstrap().await.unwrap();

        let exit = supervisor.play( &state ).await.unwrap();
        assert_eq!( exit.status.code(), Some( 3 ) );
        assert_eq!( exit.stdout_lines, 1 );
        assert_eq!( exit.stderr_lines, 2 );

        let state = supervisor.advance( &state ).await.unwrap();
        assert_eq!( state.current_episode, "b" );
    }


    #[tokio::test]
    async fn test_options_follow_media_path() {
        let temp = TempDir::new().unwrap();
        let mut config = sh_config( temp.path() );
        config.vlc_options = vec![ "first".to_string(), "second".to_string() ];
        write_episode( &config, "ep1", "[ \"$1\" = first ] && [ \"$2\" = second ] || exit 7" );

        let mut supervisor = Supervisor::new( &config );
        let state = supervisor.bootstrap().await.unwrap();

        let exit = supervisor.play( &state ).await.unwrap();
        assert!( exit.status.success() );
    }


    #[tokio::test]
    async fn test_bootstrap_resumes_saved_state() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "" );
        write_episode( &config, "ep2", "" );

        let supervisor = Supervisor::new( &config );
        supervisor.store().save( &PlaybackState::new( "ep2" ) ).await.unwrap();
        assert_eq!( supervisor.bootstrap().await.unwrap().current_episode, "ep2" );
    }


    #[tokio::test]
    async fn test_bootstrap_empty_current_episode_cold_starts() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "echo played \"$0\"" );
        write_episode( &config, "ep2", "" );
        std::fs::write( &config.status_file_path, r#"{"currentEpisode":""}"# ).unwrap();

        let mut supervisor = Supervisor::new( &config );
        let state = supervisor.bootstrap().await.unwrap();
        assert_eq!( state.current_episode, "ep1" );
        assert_eq!( saved_episode( &config ), "ep1" );

        let exit = supervisor.play( &state ).await.unwrap();
        assert!( exit.status.success() );
        assert_eq!( exit.stdout_lines, 1 );
    }


    #[tokio::test]
    async fn test_bootstrap_corrupt_state_is_fatal() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "" );
        std::fs::write( &config.status_file_path, "not json" ).unwrap();

        let supervisor = Supervisor::new( &config );
        let result = supervisor.bootstrap().await;
        assert!( matches!( result, Err( SupervisorError::State( StateError::Corrupt { .. } ) ) ) );

        // never silently reinitialized
        assert_eq!( std::fs::read_to_string( &config.status_file_path ).unwrap(), "not json" );
    }


    #[tokio::test]
    async fn test_bootstrap_empty_directory_fails() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );

        let supervisor = Supervisor::new( &config );
        let result = supervisor.bootstrap().await;
        assert!( matches!( result, Err( SupervisorError::Sequence( SequenceError::EmptyCatalog ) ) ) );
        assert!( !config.status_file_path.exists() );
    }


    #[tokio::test]
    async fn test_advance_after_episode_deleted() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "" );
        write_episode( &config, "ep2", "" );

        let supervisor = Supervisor::new( &config );
        let state = PlaybackState::new( "ep2" );
        std::fs::remove_file( supervisor.catalog().path_of( "ep2" ) ).unwrap();

        let state = supervisor.advance( &state ).await.unwrap();
        assert_eq!( state.current_episode, "ep1" );
    }


    #[tokio::test]
    async fn test_missing_player_fails_launch() {
        let temp = TempDir::new().unwrap();
        let mut config = sh_config( temp.path() );
        config.vlc_executable_path = temp.path().join( "no-such-player" );
        write_episode( &config, "ep1", "" );

        let mut supervisor = Supervisor::new( &config );
        let state = supervisor.bootstrap().await.unwrap();

        let result = supervisor.play( &state ).await;
        assert!( matches!( result, Err( SupervisorError::Launch { .. } ) ) );
        assert_eq!( supervisor.phase(), Phase::Idle );
    }


    #[tokio::test]
    async fn test_shutdown_stops_without_advancing() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "exec sleep 30" );
        write_episode( &config, "ep2", "exec sleep 30" );

        let mut supervisor = Supervisor::new( &config );
        let result = tokio::time::timeout(
            Duration::from_secs( 10 ),
            supervisor.run_until( tokio::time::sleep( Duration::from_millis( 200 ) ) ),
        ).await;

        assert!( matches!( result, Ok( Ok( () ) ) ) );
        assert_eq!( supervisor.phase(), Phase::Idle );
        assert_eq!( saved_episode( &config ), "ep1" );
    }


    #[tokio::test]
    async fn test_run_until_advances_through_episodes() {
        let temp = TempDir::new().unwrap();
        let config = sh_config( temp.path() );
        write_episode( &config, "ep1", "exit 0" );
        write_episode( &config, "ep2", "exec sleep 30" );

        let mut supervisor = Supervisor::new( &config );
        let result = tokio::time::timeout(
            Duration::from_secs( 10 ),
            supervisor.run_until( tokio::time::sleep( Duration::from_millis( 500 ) ) ),
        ).await;

        assert!( matches!( result, Ok( Ok( () ) ) ) );
        assert_eq!( saved_episode( &config ), "ep2" );
    }


    #[tokio::test]
    async fn test_run_stops_on_unreadable_directory() {
        let temp = TempDir::new().unwrap();
        let mut config = sh_config( temp.path() );
        config.episode_dir = temp.path().join( "missing" );

        let mut supervisor = Supervisor::new( &config );
        let result = supervisor.run().await;
        assert!( matches!( result, Err( SupervisorError::Catalog( CatalogError::NotFound( _ ) ) ) ) );
    }


    #[tokio::test]
    async fn test_forward_output_counts_lines() {
        let count = forward_output( &b"first\r\nsecond\nlast without newline"[ .. ], "stdout" ).await;
        assert_eq!( count, 3 );
    }


    #[tokio::test]
    async fn test_forward_output_splits_unterminated_output() {
        let output = vec![ b'x'; 20_000 ];
        let count = forward_output( &output[ .. ], "stderr" ).await;
        assert_eq!( count, 3 );
    }
}
