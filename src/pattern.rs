// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::fmt;

/// The number of steps in a pattern: four bars of sixteenth notes.
pub const STEP_COUNT: usize = 64;

/// Typed error for step row parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid character '{1}' in step row for {0}")]
    InvalidCharacter(String, char),

    #[error("Step row for {0} has {1} steps, must evenly divide {max}", max = STEP_COUNT)]
    InvalidRowLength(String, usize),
}

/// A sequencer pattern: for each instrument, which of the 64 steps trigger
/// it. Patterns are plain data. The scheduler reads a snapshot and never
/// writes back, so an edited pattern takes effect by swapping it in whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    name: String,
    rows: HashMap<String, [bool; STEP_COUNT]>,
}

impl Pattern {
    /// Creates a new, empty pattern.
    pub fn new<S: Into<String>>(name: S) -> Pattern {
        Pattern {
            name: name.into(),
            rows: HashMap::new(),
        }
    }

    /// Gets the name of the pattern.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses a step row in compact notation and adds it to the pattern,
    /// replacing any existing row for the instrument.
    ///
    /// Notation: `x` or `X` marks an active step, `.` or `-` a rest.
    /// Whitespace and `|` are ignored, so rows can be grouped by beat or
    /// bar for readability. Rows shorter than the pattern are repeated to
    /// fill all 64 steps and must evenly divide the step count.
    pub fn add_row(&mut self, instrument: &str, notation: &str) -> Result<(), PatternError> {
        let mut steps = Vec::with_capacity(STEP_COUNT);
        for ch in notation.chars() {
            match ch {
                'x' | 'X' => steps.push(true),
                '.' | '-' => steps.push(false),
                c if c.is_whitespace() || c == '|' => {}
                c => {
                    return Err(PatternError::InvalidCharacter(instrument.to_string(), c));
                }
            }
        }

        if steps.is_empty() || steps.len() > STEP_COUNT || STEP_COUNT % steps.len() != 0 {
            return Err(PatternError::InvalidRowLength(
                instrument.to_string(),
                steps.len(),
            ));
        }

        let mut row = [false; STEP_COUNT];
        for (i, step) in row.iter_mut().enumerate() {
            *step = steps[i % steps.len()];
        }
        self.rows.insert(instrument.to_string(), row);
        Ok(())
    }

    /// Sets a single step for an instrument, creating an empty row if the
    /// instrument has none yet. Steps outside the pattern range are ignored.
    pub fn set_step(&mut self, instrument: &str, step: usize, active: bool) {
        if step >= STEP_COUNT {
            return;
        }
        self.rows
            .entry(instrument.to_string())
            .or_insert([false; STEP_COUNT])[step] = active;
    }

    /// Returns true if the instrument triggers on the given step.
    pub fn is_active(&self, instrument: &str, step: usize) -> bool {
        step < STEP_COUNT
            && self
                .rows
                .get(instrument)
                .is_some_and(|row| row[step])
    }

    /// The instruments that trigger on the given step, sorted by name so
    /// that trigger order is deterministic.
    pub fn active_instruments(&self, step: usize) -> Vec<&str> {
        if step >= STEP_COUNT {
            return Vec::new();
        }
        let mut instruments: Vec<&str> = self
            .rows
            .iter()
            .filter(|(_, row)| row[step])
            .map(|(instrument, _)| instrument.as_str())
            .collect();
        instruments.sort_unstable();
        instruments
    }

    /// All instruments in the pattern, sorted by name.
    pub fn instruments(&self) -> Vec<&str> {
        let mut instruments: Vec<&str> = self.rows.keys().map(|name| name.as_str()).collect();
        instruments.sort_unstable();
        instruments
    }

    /// Gets the step row for an instrument.
    pub fn row(&self, instrument: &str) -> Option<&[bool; STEP_COUNT]> {
        self.rows.get(instrument)
    }

    /// Renders an instrument's row back into compact notation, grouped by
    /// beat.
    pub fn notation(&self, instrument: &str) -> Option<String> {
        self.rows.get(instrument).map(|row| {
            let mut notation = String::with_capacity(STEP_COUNT + STEP_COUNT / 4);
            for (i, step) in row.iter().enumerate() {
                if i > 0 && i % 4 == 0 {
                    notation.push(' ');
                }
                notation.push(if *step { 'x' } else { '.' });
            }
            notation
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for instrument in self.instruments() {
            if let Some(notation) = self.notation(instrument) {
                writeln!(f, "  {:10} {}", instrument, notation)?;
            }
        }
        Ok(())
    }
}
