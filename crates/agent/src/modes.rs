//! Capability profiles that decide which tools the model is offered

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModeSlug {
    #[default]
    Editor,
    Organizer,
    Researcher,
    Writer,
}

impl ModeSlug {
    pub const ALL: [ModeSlug; 4] = [
        ModeSlug::Editor,
        ModeSlug::Organizer,
        ModeSlug::Researcher,
        ModeSlug::Writer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeSlug::Editor => "editor",
            ModeSlug::Organizer => "organizer",
            ModeSlug::Researcher => "researcher",
            ModeSlug::Writer => "writer",
        }
    }
}

impl fmt::Display for ModeSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown mode '{0}' (expected editor, organizer, researcher or writer)")]
pub struct UnknownMode(pub String);

impl FromStr for ModeSlug {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModeSlug::ALL
            .into_iter()
            .find(|slug| slug.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode {
    pub slug: ModeSlug,
    pub name: &'static str,
    pub role_definition: &'static str,
    /// Tools offered in this mode; `attempt_completion` is always added
    pub tools: Vec<&'static str>,
}

impl Mode {
    pub fn get(slug: ModeSlug) -> Self {
        match slug {
            ModeSlug::Editor => Mode {
                slug,
                name: "Editor",
                role_definition: "You are a meticulous note editor. You improve existing notes: \
                    fix structure and wording, keep the author's voice, and change only what the \
                    task asks for.",
                tools: vec![
                    "read_note",
                    "edit_note",
                    "list_notes",
                    "grep_search",
                    "get_backlinks",
                ],
            },
            ModeSlug::Organizer => Mode {
                slug,
                name: "Organizer",
                role_definition: "You are a knowledge-base organizer. You keep the note library \
                    tidy: you move, rename and group notes into folders, and remove clutter when \
                    asked.",
                tools: vec![
                    "read_note",
                    "delete_note",
                    "move_note",
                    "rename_file",
                    "create_folder",
                    "list_notes",
                    "grep_search",
                    "get_backlinks",
                ],
            },
            ModeSlug::Researcher => Mode {
                slug,
                name: "Researcher",
                role_definition: "You are a careful researcher working over the user's notes. \
                    You find, read and connect information and answer with references to the \
                    notes you used. You do not modify notes.",
                tools: vec!["read_note", "list_notes", "grep_search", "get_backlinks"],
            },
            ModeSlug::Writer => Mode {
                slug,
                name: "Writer",
                role_definition: "You are a skilled writer. You draft new notes from the user's \
                    instructions and existing material, with clear markdown structure.",
                tools: vec![
                    "read_note",
                    "create_note",
                    "create_folder",
                    "list_notes",
                    "grep_search",
                    "get_backlinks",
                ],
            },
        }
    }

    pub fn all() -> Vec<Mode> {
        ModeSlug::ALL.into_iter().map(Mode::get).collect()
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| *t == tool)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::get(ModeSlug::default())
    }
}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<ModeSlug>().map(Mode::get)
    }
}
