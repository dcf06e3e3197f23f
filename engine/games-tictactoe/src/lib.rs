//! Tic-tac-toe reference environment
//!
//! Provides the `Environment` implementation used to replay tic-tac-toe game
//! records, plus a uniformly random self-play generator used by the
//! `tictactoe-selfplay` binary.
//!
//! # Usage
//!
//! ```rust
//! use games_tictactoe::register_tictactoe;
//! use engine_core::create_environment;
//!
//! register_tictactoe();
//!
//! let env = create_environment("tictactoe").expect("tictactoe should be registered");
//! let state = env.step(&env.initial_state(), "4").unwrap();
//! assert_eq!(state, "----X----");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use engine_core::{register_environment, EnvError, Environment, GameRecord};
use once_cell::sync::Lazy;
use rand::Rng;

/// Registry key of this environment
pub const ENV_ID: &str = "tictactoe";

/// Floats per encoded position: 18 board planes + 9 legal + 2 player
pub const OBSERVATION_SIZE: usize = 29;

static ACTION_LABELS: Lazy<Vec<String>> = Lazy::new(|| (0..9).map(|i| i.to_string()).collect());

/// Register TicTacToe with the global environment registry
///
/// Call this function once at startup to make the environment available
/// via `create_environment("tictactoe")`.
pub fn register_tictactoe() {
    register_environment(ENV_ID, || Arc::new(TicTacToe::new()));
}

/// TicTacToe game state
///
/// Serialised as nine characters, row-major, `-` for empty and `X`/`O` for
/// pieces. X always moves first, so the side to move follows from the piece
/// counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    /// Board representation: 0=empty, 1=X, 2=O
    board: [u8; 9],
    /// Current player: 1=X, 2=O
    current_player: u8,
    /// Winner: 0=none/ongoing, 1=X, 2=O, 3=draw
    winner: u8,
}

impl State {
    /// Create a new initial game state
    pub fn new() -> Self {
        Self {
            board: [0; 9],
            current_player: 1, // X goes first
            winner: 0,
        }
    }

    pub fn current_player(&self) -> u8 {
        self.current_player
    }

    pub fn winner(&self) -> u8 {
        self.winner
    }

    /// Check if the game is over
    pub fn is_done(&self) -> bool {
        self.winner != 0
    }

    /// Get legal moves (empty positions)
    pub fn legal_moves(&self) -> Vec<u8> {
        if self.is_done() {
            return Vec::new();
        }

        (0..9u8)
            .filter(|&pos| self.board[pos as usize] == 0)
            .collect()
    }

    /// Place the current player's piece, or `None` if the move is illegal.
    pub fn make_move(&self, position: u8) -> Option<State> {
        if self.is_done() || position >= 9 || self.board[position as usize] != 0 {
            return None;
        }

        let mut new_state = *self;
        new_state.board[position as usize] = self.current_player;
        new_state.winner = Self::check_winner(&new_state.board);

        if new_state.winner == 0 {
            new_state.current_player = if self.current_player == 1 { 2 } else { 1 };
        }

        Some(new_state)
    }

    /// Check for winner on the board
    fn check_winner(board: &[u8; 9]) -> u8 {
        const LINES: [[usize; 3]; 8] = [
            [0, 1, 2],
            [3, 4, 5],
            [6, 7, 8], // rows
            [0, 3, 6],
            [1, 4, 7],
            [2, 5, 8], // columns
            [0, 4, 8],
            [2, 4, 6], // diagonals
        ];

        for line in &LINES {
            let [a, b, c] = *line;
            if board[a] != 0 && board[a] == board[b] && board[b] == board[c] {
                return board[a];
            }
        }

        if board.iter().all(|&cell| cell != 0) {
            return 3; // Draw
        }

        0
    }

    /// Deterministic 29-float encoding of the position.
    pub fn encode(&self) -> Vec<f32> {
        let mut out = vec![0.0; OBSERVATION_SIZE];

        // One-hot board planes: X in 0..9, O in 9..18
        for (i, &cell) in self.board.iter().enumerate() {
            match cell {
                1 => out[i] = 1.0,
                2 => out[i + 9] = 1.0,
                _ => {}
            }
        }

        for pos in self.legal_moves() {
            out[18 + pos as usize] = 1.0;
        }

        if self.current_player == 1 {
            out[27] = 1.0;
        } else {
            out[28] = 1.0;
        }

        out
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &cell in &self.board {
            let c = match cell {
                1 => 'X',
                2 => 'O',
                _ => '-',
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for State {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EnvError::InvalidState(s.to_string());

        let mut board = [0u8; 9];
        let mut chars = s.chars();
        for cell in board.iter_mut() {
            *cell = match chars.next() {
                Some('-') => 0,
                Some('X') => 1,
                Some('O') => 2,
                _ => return Err(invalid()),
            };
        }
        if chars.next().is_some() {
            return Err(invalid());
        }

        let xs = board.iter().filter(|&&c| c == 1).count();
        let os = board.iter().filter(|&&c| c == 2).count();
        let to_move = match xs.checked_sub(os) {
            Some(0) => 1,
            Some(1) => 2,
            _ => return Err(invalid()),
        };

        // A finished game keeps the last mover as current player.
        let winner = Self::check_winner(&board);
        let current_player = if winner == 0 {
            to_move
        } else if xs > os {
            1
        } else {
            2
        };

        Ok(State {
            board,
            current_player,
            winner,
        })
    }
}

/// TicTacToe environment
#[derive(Debug, Default)]
pub struct TicTacToe;

impl TicTacToe {
    pub fn new() -> Self {
        Self
    }
}

impl Environment for TicTacToe {
    fn env_id(&self) -> &str {
        ENV_ID
    }

    fn initial_state(&self) -> String {
        State::new().to_string()
    }

    fn action_labels(&self) -> &[String] {
        &ACTION_LABELS
    }

    fn step(&self, state: &str, action: &str) -> Result<String, EnvError> {
        let current: State = state.parse()?;
        let position = self
            .action_index(action)
            .ok_or_else(|| EnvError::UnknownAction(action.to_string()))?;

        current
            .make_move(position as u8)
            .map(|next| next.to_string())
            .ok_or_else(|| EnvError::IllegalMove {
                state: state.to_string(),
                action: action.to_string(),
            })
    }

    fn encode(&self, state: &str) -> Result<Vec<f32>, EnvError> {
        Ok(state.parse::<State>()?.encode())
    }

    fn observation_size(&self) -> usize {
        OBSERVATION_SIZE
    }

    fn legal_actions(&self, state: &str) -> Result<Vec<String>, EnvError> {
        let current: State = state.parse()?;
        Ok(current
            .legal_moves()
            .into_iter()
            .map(|pos| pos.to_string())
            .collect())
    }
}

/// Play one game with uniformly random legal moves.
///
/// Each step's value is the final outcome from the perspective of the player
/// to move at that ply: +1 for a win, -1 for a loss, 0 for a draw.
pub fn play_random_game<R: Rng + ?Sized>(rng: &mut R) -> GameRecord {
    let mut state = State::new();
    let mut moves = Vec::with_capacity(9);
    let mut movers = Vec::with_capacity(9);

    while !state.is_done() {
        let legal = state.legal_moves();
        let position = legal[rng.gen_range(0..legal.len())];
        movers.push(state.current_player);
        moves.push(position);
        state = match state.make_move(position) {
            Some(next) => next,
            None => break,
        };
    }

    let mut record = GameRecord::new(State::new().to_string());
    for (position, mover) in moves.into_iter().zip(movers) {
        let value = match state.winner {
            w if w == mover => 1.0,
            1 | 2 => -1.0,
            _ => 0.0,
        };
        record.push(position.to_string(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn play(moves: &[u8]) -> State {
        moves.iter().fold(State::new(), |state, &pos| {
            state.make_move(pos).expect("legal move")
        })
    }

    #[test]
    fn test_initial_state() {
        let state = State::new();
        assert_eq!(state.board, [0; 9]);
        assert_eq!(state.current_player, 1);
        assert_eq!(state.winner, 0);
        assert!(!state.is_done());
        assert_eq!(state.to_string(), "---------");
    }

    #[test]
    fn test_make_move() {
        let state = State::new().make_move(4).unwrap();

        assert_eq!(state.board[4], 1);
        assert_eq!(state.current_player, 2);
        assert_eq!(state.to_string(), "----X----");
        assert!(state.make_move(4).is_none());
        assert!(state.make_move(9).is_none());
    }

    #[test]
    fn test_winning_game() {
        // X wins with top row
        let state = play(&[0, 3, 1, 4, 2]);

        assert_eq!(state.winner, 1);
        assert!(state.is_done());
        assert!(state.legal_moves().is_empty());
        assert!(state.make_move(5).is_none());
    }

    #[test]
    fn test_draw_game() {
        let state = play(&[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert_eq!(state.winner, 3);
        assert!(state.is_done());
    }

    #[test]
    fn test_state_string_roundtrip() {
        for moves in [&[][..], &[4], &[0, 3, 1, 4, 2], &[0, 1, 2, 4, 3, 5, 7, 6, 8]] {
            let state = play(moves);
            let parsed: State = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn test_invalid_state_strings() {
        for bad in ["", "--------", "----------", "XX-------", "O--------", "---a-----"] {
            assert!(
                matches!(bad.parse::<State>(), Err(EnvError::InvalidState(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_encoding_layout() {
        let state = play(&[4, 0]);
        let enc = state.encode();

        assert_eq!(enc.len(), OBSERVATION_SIZE);
        assert_eq!(enc[4], 1.0); // X at center
        assert_eq!(enc[9], 1.0); // O at corner
        assert_eq!(enc[18], 0.0); // occupied
        assert_eq!(enc[18 + 4], 0.0);
        assert_eq!(enc[18 + 1], 1.0);
        assert_eq!(enc[27], 1.0); // X to move
        assert_eq!(enc[28], 0.0);
    }

    #[test]
    fn test_environment_step_errors() {
        let env = TicTacToe::new();
        let start = env.initial_state();

        assert!(matches!(
            env.step(&start, "9"),
            Err(EnvError::UnknownAction(_))
        ));

        let after = env.step(&start, "4").unwrap();
        assert!(matches!(
            env.step(&after, "4"),
            Err(EnvError::IllegalMove { .. })
        ));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let env = TicTacToe::new();
        let state = env.step(&env.initial_state(), "2").unwrap();
        assert_eq!(env.encode(&state).unwrap(), env.encode(&state).unwrap());
    }

    #[test]
    fn test_random_games_replay_and_values() {
        let env = TicTacToe::new();

        for seed in 0..50 {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let record = play_random_game(&mut rng);

            assert!(record.steps.len() >= 5 && record.steps.len() <= 9);

            let mut state = record.initial_state.clone();
            for (action, _) in &record.steps {
                state = env.step(&state, action).unwrap();
            }
            let end: State = state.parse().unwrap();
            assert!(end.is_done(), "seed {seed} did not finish");

            // Consecutive plies alternate perspective
            for pair in record.steps.windows(2) {
                assert_eq!(pair[0].1, -pair[1].1, "seed {seed}");
            }

            let last_value = record.steps.last().unwrap().1;
            if end.winner == 3 {
                assert_eq!(last_value, 0.0);
            } else {
                // The final mover is the winner
                assert_eq!(last_value, 1.0);
            }
        }
    }

    #[test]
    fn test_registered_environment() {
        register_tictactoe();
        let env = engine_core::create_environment(ENV_ID).unwrap();
        assert_eq!(env.action_labels().len(), 9);
        assert_eq!(env.observation_size(), OBSERVATION_SIZE);
    }
}
