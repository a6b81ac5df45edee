//! Text rendering of the board state for the terminal client.
//!
//! Presentation only: reads immutable views from the sync machine and never
//! mutates game state.

use crate::rules::RulesAdapter;
use crate::sync::GameView;
use shared::Side;

fn piece_glyph(side: Side, letter: char) -> char {
    match side {
        Side::White => letter.to_ascii_uppercase(),
        Side::Black => letter,
    }
}

/// Draws the board from the local player's orientation. White pieces are
/// uppercase, black lowercase.
pub fn board_lines(rules: &RulesAdapter, orientation: Side) -> Vec<String> {
    let grid = rules.piece_grid();
    let mut lines = Vec::with_capacity(10);

    let ranks: Vec<usize> = match orientation {
        Side::White => (0..8).rev().collect(),
        Side::Black => (0..8).collect(),
    };
    for rank in ranks {
        let mut line = format!("{} ", rank + 1);
        let files: Vec<usize> = match orientation {
            Side::White => (0..8).collect(),
            Side::Black => (0..8).rev().collect(),
        };
        for file in files {
            match grid[rank * 8 + file] {
                Some((side, letter)) => {
                    line.push(piece_glyph(side, letter));
                }
                None => line.push('.'),
            }
            line.push(' ');
        }
        lines.push(line.trim_end().to_string());
    }
    let file_row = match orientation {
        Side::White => "  a b c d e f g h",
        Side::Black => "  h g f e d c b a",
    };
    lines.push(file_row.to_string());
    lines
}

/// Numbered move list, two plies per row, like a score sheet.
pub fn move_list_lines(view: &GameView) -> Vec<String> {
    let moves: Vec<&str> = view.position.moves().collect();
    moves
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| match pair {
            [white, black] => format!("{}. {} {}", i + 1, white, black),
            [white] => format!("{}. {}", i + 1, white),
            _ => unreachable!(),
        })
        .collect()
}

/// One-line status banner under the board.
pub fn status_line(view: &GameView) -> String {
    format!(
        "{} to move | you play {} | {:?}",
        view.side_to_move, view.orientation, view.phase
    )
}

pub fn print_view(rules: &RulesAdapter, view: &GameView) {
    for line in board_lines(rules, view.orientation) {
        println!("{}", line);
    }
    println!("{}", status_line(view));
}
