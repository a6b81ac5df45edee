//! Adapter over the external chess rules engine.
//!
//! Everything rule-shaped (legality, check, mate, draw detection) is
//! delegated to the `chess` crate; this module only translates between the
//! engine's vocabulary and ours, and owns the snapshot encoding.

use chess::{Action, Board, BoardStatus, ChessMove, Color, File, Game, Piece, Rank, Square};
use shared::{PositionSnapshot, Side};
use thiserror::Error;

/// Terminal-state classification of the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Checkmate { winner: Side },
    Stalemate,
    /// Draw by rule (threefold repetition or the fifty-move rule).
    Draw,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unparseable move token '{0}'")]
    BadToken(String),
    #[error("illegal move '{0}' in snapshot")]
    IllegalMove(String),
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

fn parse_square(s: &str) -> Option<Square> {
    let mut chars = s.chars();
    let file = chars.next()?;
    let rank = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let file_index = (file as i32) - ('a' as i32);
    let rank_index = (rank as i32) - ('1' as i32);
    if !(0..8).contains(&file_index) || !(0..8).contains(&rank_index) {
        return None;
    }
    Some(Square::make_square(
        Rank::from_index(rank_index as usize),
        File::from_index(file_index as usize),
    ))
}

fn parse_promotion(c: char) -> Option<Piece> {
    match c.to_ascii_lowercase() {
        'q' => Some(Piece::Queen),
        'r' => Some(Piece::Rook),
        'b' => Some(Piece::Bishop),
        'n' => Some(Piece::Knight),
        _ => None,
    }
}

fn promotion_char(piece: Piece) -> char {
    match piece {
        Piece::Queen => 'q',
        Piece::Rook => 'r',
        Piece::Bishop => 'b',
        Piece::Knight => 'n',
        // Pawns and kings are not promotion targets; keep the encoding total.
        Piece::Pawn => 'p',
        Piece::King => 'k',
    }
}

fn format_move(mv: &ChessMove) -> String {
    match mv.get_promotion() {
        Some(piece) => format!("{}{}{}", mv.get_source(), mv.get_dest(), promotion_char(piece)),
        None => format!("{}{}", mv.get_source(), mv.get_dest()),
    }
}

/// The single authoritative board held by the sync machine.
#[derive(Debug)]
pub struct RulesAdapter {
    game: Game,
}

impl RulesAdapter {
    pub fn new() -> Self {
        Self { game: Game::new() }
    }

    /// Rebuilds a board wholesale from a replicated move history.
    pub fn from_snapshot(snapshot: &PositionSnapshot) -> Result<Self, SnapshotError> {
        let mut rules = Self::new();
        for token in snapshot.moves() {
            if !rules.apply_coordinate_move(token) {
                // Distinguish garbage from well-formed-but-illegal for logs.
                let parsed = token.len() >= 4
                    && token.is_char_boundary(2)
                    && token.is_char_boundary(4)
                    && parse_square(&token[0..2]).is_some()
                    && parse_square(&token[2..4]).is_some();
                return Err(if parsed {
                    SnapshotError::IllegalMove(token.to_string())
                } else {
                    SnapshotError::BadToken(token.to_string())
                });
            }
        }
        Ok(rules)
    }

    /// Serializes the move history back out as the replication snapshot.
    pub fn snapshot(&self) -> PositionSnapshot {
        let moves: Vec<String> = self
            .game
            .actions()
            .iter()
            .filter_map(|action| match action {
                Action::MakeMove(mv) => Some(format_move(mv)),
                _ => None,
            })
            .collect();
        PositionSnapshot::new(moves.join(" "))
    }

    pub fn side_to_move(&self) -> Side {
        side_of(self.game.side_to_move())
    }

    pub fn move_count(&self) -> usize {
        self.game
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::MakeMove(_)))
            .count()
    }

    /// Current position in FEN, for logs and rendering.
    pub fn fen(&self) -> String {
        self.game.current_position().to_string()
    }

    /// Attempts a move given as source/destination squares plus an optional
    /// promotion hint. Returns false (and changes nothing) if the engine
    /// rejects it. A promoting move without a hint falls back to a queen,
    /// matching what board UIs send.
    pub fn try_move(&mut self, from: &str, to: &str, promotion: Option<char>) -> bool {
        let (source, dest) = match (parse_square(from), parse_square(to)) {
            (Some(s), Some(d)) => (s, d),
            _ => return false,
        };
        let promo = promotion.and_then(parse_promotion);

        let board = self.game.current_position();
        let candidate = ChessMove::new(source, dest, promo);
        if board.legal(candidate) {
            return self.game.make_move(candidate);
        }
        if promo.is_none() {
            let queening = ChessMove::new(source, dest, Some(Piece::Queen));
            if board.legal(queening) {
                return self.game.make_move(queening);
            }
        }
        false
    }

    /// Applies one coordinate-notation token ("e2e4", "e7e8q").
    pub fn apply_coordinate_move(&mut self, token: &str) -> bool {
        if token.len() < 4 || !token.is_char_boundary(2) || !token.is_char_boundary(4) {
            return false;
        }
        let promotion = token[4..].chars().next();
        self.try_move(&token[0..2], &token[2..4], promotion)
    }

    pub fn status(&self) -> GameStatus {
        match self.game.current_position().status() {
            BoardStatus::Checkmate => GameStatus::Checkmate {
                winner: self.side_to_move().opponent(),
            },
            BoardStatus::Stalemate => GameStatus::Stalemate,
            BoardStatus::Ongoing => {
                if self.game.can_declare_draw() {
                    GameStatus::Draw
                } else {
                    GameStatus::Ongoing
                }
            }
        }
    }

    /// Piece placement for rendering: `(side, piece_letter)` per square,
    /// index 0 = a1.
    pub fn piece_grid(&self) -> [Option<(Side, char)>; 64] {
        let board: Board = self.game.current_position();
        let mut grid = [None; 64];
        for (index, slot) in grid.iter_mut().enumerate() {
            let square = Square::make_square(
                Rank::from_index(index / 8),
                File::from_index(index % 8),
            );
            if let Some(piece) = board.piece_on(square) {
                let color = board.color_on(square).unwrap_or(Color::White);
                let letter = match piece {
                    Piece::Pawn => 'p',
                    Piece::Knight => 'n',
                    Piece::Bishop => 'b',
                    Piece::Rook => 'r',
                    Piece::Queen => 'q',
                    Piece::King => 'k',
                };
                *slot = Some((side_of(color), letter));
            }
        }
        grid
    }
}

impl Default for RulesAdapter {
    fn default() -> Self {
        Self::new()
    }
}
