//! Conversation grouping - ordered rows to ordered conversations.
//!
//! Each row is classified by a fixed decision table, checked top to bottom:
//!
//! | explicit id            | utterance field | wide row | shape                                   |
//! |------------------------|-----------------|----------|-----------------------------------------|
//! | yes                    | yes             | any      | one turn of conversation `<id>`         |
//! | blank, or none (1)     | yes             | yes      | singleton conversation `conv_<row + 1>` |
//! | any                    | any             | yes      | every other non-empty cell is a turn    |
//! | no                     | yes             | no       | singleton conversation `conv_<row + 1>` |
//! | any                    | no              | no       | dropped                                 |
//!
//! (1) with the utterance in the first column, which would otherwise be the key.
//!
//! Explicit id columns: `conversation_id`, `test_name`, `case_name`, `id`.
//! Utterance fields, first match wins: `user_input`, `input`, `query`, `message`.
//! A row is wide when it has more than two columns, or exactly two columns and
//! the second is not an utterance field. A wide row is keyed by its explicit id
//! when present, else by its first cell. Empty wide cells are skipped.
//!
//! Within a conversation turns are stably sorted by numeric `turn_number`
//! (default 0), so ties keep input order.

use std::collections::HashMap;

use crate::csv_input::Row;
use crate::error::SimulationError;

pub const ID_COLUMNS: [&str; 4] = ["conversation_id", "test_name", "case_name", "id"];
pub const UTTERANCE_FIELDS: [&str; 4] = ["user_input", "input", "query", "message"];
pub const TURN_NUMBER_COLUMN: &str = "turn_number";

/// One utterance waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub text: String,
    /// Sort key from the `turn_number` column, 0 when absent
    pub order_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<Turn>,
}

/// How a single row contributes to the grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowShape {
    Keyed { id: String, turn: Turn },
    Wide { id: String, turns: Vec<Turn> },
    Singleton { turn: Turn },
    Dropped,
}

/// Group rows into conversations, in first-appearance order.
///
/// Pure and deterministic. Zero rows, or zero usable rows, is `EmptyInput`.
pub fn group(rows: &[Row]) -> Result<Vec<Conversation>, SimulationError> {
    if rows.is_empty() {
        return Err(SimulationError::EmptyInput);
    }

    let mut conversations: Vec<Conversation> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (row_index, row) in rows.iter().enumerate() {
        let (id, turns) = match classify(row) {
            RowShape::Keyed { id, turn } => (id, vec![turn]),
            RowShape::Wide { id, turns } => {
                let id = if id.is_empty() {
                    synthetic_id(row_index)
                } else {
                    id
                };
                (id, turns)
            }
            RowShape::Singleton { turn } => (synthetic_id(row_index), vec![turn]),
            RowShape::Dropped => continue,
        };
        if turns.is_empty() {
            continue;
        }

        let slot = *index.entry(id.clone()).or_insert_with(|| {
            conversations.push(Conversation {
                id,
                turns: Vec::new(),
            });
            conversations.len() - 1
        });
        conversations[slot].turns.extend(turns);
    }

    if conversations.is_empty() {
        return Err(SimulationError::EmptyInput);
    }

    for conversation in &mut conversations {
        conversation.turns.sort_by_key(|turn| turn.order_key);
    }

    Ok(conversations)
}

fn classify(row: &Row) -> RowShape {
    let explicit_id = explicit_id(row);
    let utterance = utterance(row);
    let order_key = order_key(row);
    let singleton = |text: &str| RowShape::Singleton {
        turn: Turn {
            text: text.to_string(),
            order_key,
        },
    };

    match (explicit_id, utterance, is_wide(row)) {
        (Some((_, id)), Some((_, text)), _) => RowShape::Keyed {
            id: id.to_string(),
            turn: Turn {
                text: text.to_string(),
                order_key,
            },
        },
        // A blank id cell, or an utterance in the key column, never becomes the key.
        (None, Some((position, text)), true) if has_id_column(row) || position == 0 => {
            singleton(text)
        }
        (explicit, _, true) => {
            let (id_position, id) = explicit.unwrap_or_else(|| {
                (0, row.columns().first().map(|(_, v)| v.trim()).unwrap_or(""))
            });
            let turn_number_position = row.position(TURN_NUMBER_COLUMN);
            let turns = row
                .columns()
                .iter()
                .enumerate()
                .filter(|(pos, _)| *pos != id_position && Some(*pos) != turn_number_position)
                .filter(|(_, (_, value))| !value.trim().is_empty())
                .map(|(_, (_, value))| Turn {
                    text: value.clone(),
                    order_key,
                })
                .collect();
            RowShape::Wide {
                id: id.to_string(),
                turns,
            }
        }
        (None, Some((_, text)), false) => singleton(text),
        (_, None, false) => RowShape::Dropped,
    }
}

/// First explicit id column with a non-empty value, with its position.
fn explicit_id(row: &Row) -> Option<(usize, &str)> {
    ID_COLUMNS.iter().find_map(|column| {
        let position = row.position(column)?;
        let value = row.columns()[position].1.trim();
        (!value.is_empty()).then_some((position, value))
    })
}

/// First non-blank utterance field, with its position.
fn utterance(row: &Row) -> Option<(usize, &str)> {
    UTTERANCE_FIELDS.iter().find_map(|field| {
        let position = row.position(field)?;
        let value = row.columns()[position].1.as_str();
        (!value.trim().is_empty()).then_some((position, value))
    })
}

fn has_id_column(row: &Row) -> bool {
    ID_COLUMNS.iter().any(|column| row.position(column).is_some())
}

fn is_wide(row: &Row) -> bool {
    match row.len() {
        0 | 1 => false,
        2 => {
            let second = row.columns()[1].0.trim();
            !UTTERANCE_FIELDS
                .iter()
                .any(|field| second.eq_ignore_ascii_case(field))
        }
        _ => true,
    }
}

fn order_key(row: &Row) -> i64 {
    row.get(TURN_NUMBER_COLUMN)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

fn synthetic_id(row_index: usize) -> String {
    format!("conv_{}", row_index + 1)
}
