//! Notes database: documentation attached to types and their parts

use std::collections::HashMap;

use crate::types::Note;

#[derive(Debug, Default, Clone)]
pub struct NotesDatabase {
    by_type: HashMap<String, Vec<Note>>,
}

impl NotesDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, type_name: &str, note: Note) {
        self.by_type
            .entry(type_name.to_string())
            .or_default()
            .push(note);
    }

    /// All notes for a type, in insertion order.
    pub fn notes_for(&self, type_name: &str) -> &[Note] {
        self.by_type
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Notes attached to one part (`Some`) or to the type itself (`None`).
    pub fn notes_for_part<'a>(
        &'a self,
        type_name: &str,
        part: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Note> + 'a {
        self.notes_for(type_name)
            .iter()
            .filter(move |n| n.part.as_deref() == part)
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
    }
}
