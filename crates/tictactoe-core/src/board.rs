use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// The mark handed to the first player and the one that opens every game.
    pub const FIRST: Mark = Mark::X;

    pub fn symbol(&self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

pub type Board = [Option<Mark>; 9];

pub const EMPTY_BOARD: Board = [None; 9];

/// Rows, then columns, then diagonals. Scan order decides which line is
/// reported when a board has more than one.
pub const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// First completed line and the mark that owns it.
pub fn winning_line(board: &Board) -> Option<(Mark, [usize; 3])> {
    LINES.iter().find_map(|&[a, b, c]| match board[a] {
        Some(mark) if board[b] == Some(mark) && board[c] == Some(mark) => Some((mark, [a, b, c])),
        _ => None,
    })
}

pub fn check_winner(board: &Board) -> Option<Mark> {
    winning_line(board).map(|(mark, _)| mark)
}

pub fn winning_cells(board: &Board) -> Option<[usize; 3]> {
    winning_line(board).map(|(_, cells)| cells)
}

pub fn is_full(board: &Board) -> bool {
    board.iter().all(Option::is_some)
}

pub fn next_turn(mark: Mark) -> Mark {
    match mark {
        Mark::X => Mark::O,
        Mark::O => Mark::X,
    }
}

/// Convert a Board to the wire format ("X", "O", "" for empty).
pub fn board_to_wire(board: &Board) -> Vec<String> {
    board
        .iter()
        .map(|cell| cell.map(|m| m.symbol()).unwrap_or("").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(moves: &[usize]) -> Board {
        let mut board = EMPTY_BOARD;
        let mut turn = Mark::FIRST;
        for &pos in moves {
            board[pos] = Some(turn);
            turn = next_turn(turn);
        }
        board
    }

    #[test]
    fn empty_board_has_no_winner() {
        assert_eq!(check_winner(&EMPTY_BOARD), None);
        assert_eq!(winning_cells(&EMPTY_BOARD), None);
        assert!(!is_full(&EMPTY_BOARD));
    }

    #[test]
    fn every_line_is_detected() {
        for line in LINES {
            for mark in [Mark::X, Mark::O] {
                let mut board = EMPTY_BOARD;
                for i in line {
                    board[i] = Some(mark);
                }
                assert_eq!(check_winner(&board), Some(mark), "line {:?}", line);
                assert_eq!(winning_cells(&board), Some(line));
            }
        }
    }

    #[test]
    fn mixed_line_is_not_a_win() {
        let mut board = EMPTY_BOARD;
        board[0] = Some(Mark::X);
        board[1] = Some(Mark::O);
        board[2] = Some(Mark::X);
        assert_eq!(check_winner(&board), None);
    }

    #[test]
    fn scripted_top_row_win() {
        // X: 0, 1, 2  O: 4, 5
        let board = play(&[0, 4, 1, 5, 2]);
        assert_eq!(check_winner(&board), Some(Mark::X));
        assert_eq!(winning_cells(&board), Some([0, 1, 2]));
    }

    #[test]
    fn scripted_diagonal_win_for_o() {
        // X: 0, 1, 5  O: 2, 4, 6
        let board = play(&[0, 2, 1, 4, 5, 6]);
        assert_eq!(check_winner(&board), Some(Mark::O));
        assert_eq!(winning_cells(&board), Some([2, 4, 6]));
    }

    #[test]
    fn full_board_without_line_is_draw() {
        // X O X
        // X O O
        // O X X
        let board = play(&[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert!(is_full(&board));
        assert_eq!(check_winner(&board), None);
    }

    #[test]
    fn last_cell_can_complete_a_diagonal() {
        // X: 0, 4, 5, 7, 8  O: 1, 2, 3, 6 fills the board but 0-4-8 is a line.
        let board = play(&[0, 1, 4, 2, 5, 3, 7, 6, 8]);
        assert!(is_full(&board));
        assert_eq!(winning_line(&board), Some((Mark::X, [0, 4, 8])));
    }

    #[test]
    fn first_line_wins_on_improper_board() {
        let mut board = EMPTY_BOARD;
        for i in [3, 4, 5] {
            board[i] = Some(Mark::O);
        }
        for i in [0, 1, 2] {
            board[i] = Some(Mark::X);
        }
        assert_eq!(winning_line(&board), Some((Mark::X, [0, 1, 2])));
    }

    #[test]
    fn next_turn_is_an_involution() {
        for mark in [Mark::X, Mark::O] {
            assert_ne!(next_turn(mark), mark);
            assert_eq!(next_turn(next_turn(mark)), mark);
        }
    }

    #[test]
    fn wire_board_uses_symbols() {
        let board = play(&[4, 0]);
        let wire = board_to_wire(&board);
        assert_eq!(wire.len(), 9);
        assert_eq!(wire[0], "O");
        assert_eq!(wire[4], "X");
        assert_eq!(wire[8], "");
    }
}
