use tracing::debug;

use crate::result::ResultCache;

use super::Connection;

impl Connection {
    /// Queue a prepared statement (`'s'`) or cursor (`'p'`) to be released on the gateway.
    pub fn mark_object_to_discard(&self, kind: char, name: &str) {
        self.state.lock().discards.push(format!("{}{}", kind, name));
    }

    pub fn pending_discards(&self) -> Vec<String> { self.state.lock().discards.clone() }

    /// Release queued objects, newest first. Best-effort: failures are logged and
    /// the entry is dropped all the same. Returns how many commands succeeded.
    pub fn discard_marked_objects(&self) -> usize {
        let queued = std::mem::take(&mut self.state.lock().discards);
        let mut released = 0;
        for entry in queued.iter().rev() {
            let (kind, name) = entry.split_at(1);
            let cmd = if kind == "s" { format!("DEALLOCATE \"{}\"", name) } else { format!("CLOSE \"{}\"", name) };
            let mut res = ResultCache::new();
            match self.execute_into(&cmd, &mut res, false) {
                Ok(()) => released += 1,
                Err(e) => debug!(target: "conn", "conn {} discard '{}' failed: {}", self.id, cmd, e),
            }
        }
        released
    }

    /// Recount statements whose current result holds a named cursor.
    pub fn cursor_count(&self) -> usize {
        self.statements().iter().filter(|s| s.result_cursor().is_some()).count()
    }

    /// Whether another statement of this connection already uses `name`.
    pub fn cursor_name_in_use(&self, name: &str, except_stmt: u64) -> bool {
        self.statements().iter().any(|s| {
            s.id() != except_stmt
                && (s.explicit_cursor_name().as_deref() == Some(name) || s.result_cursor().as_deref() == Some(name))
        })
    }

    /// Close the cursors a transaction end takes with it. A normal end closes
    /// non-holdable cursors; an abort closes every non-permanent one. Holdable
    /// cursors not yet known to be permanent are checked with `MOVE 0`.
    pub fn clear_cursors(&self, on_abort: bool) {
        if self.cursors() == 0 { return; }
        for stmt in self.statements() {
            let mut slot = stmt.result_slot();
            let Some(res) = slot.as_mut() else { continue };
            let Some(name) = res.cursor_name().map(str::to_string) else { continue };
            if (on_abort && !res.is_permanent()) || !res.is_withhold() {
                res.set_cursor(None);
            } else if !res.is_permanent() {
                let mut moved = ResultCache::new();
                let cmd = format!("MOVE 0 in \"{}\"", name);
                match self.execute_into(&cmd, &mut moved, false) {
                    Ok(()) if !moved.status().is_error() => res.set_permanent(true),
                    _ => res.set_cursor(None),
                }
            }
        }
    }
}
