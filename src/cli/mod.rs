use terminal_size::{terminal_size, Height, Width};

use crate::result::ResultCache;

/// Print every result of a chain: rows as an ASCII table, everything else as its command tag.
pub fn print_result_chain(res: &ResultCache) {
    let termw = get_terminal_width();
    crate::tprintln!("[cli] detected terminal width={} columns", termw);
    for r in res.chain() {
        for line in render_result(r, termw) {
            println!("{}", line);
        }
    }
}

/// Type oids whose values print right-aligned: int8, int2, int4, oid, float4, float8, numeric.
const NUMERIC_TYPES: [i32; 7] = [20, 21, 23, 26, 700, 701, 1700];

/// Lines for one result. Column widths are capped at `max_col_width`.
pub fn render_result(res: &ResultCache, max_col_width: usize) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(msg) = res.notice() { out.push(format!("NOTICE: {}", msg)); }
    if res.status().is_error() {
        out.push(format!("ERROR: {}", res.message().unwrap_or("(no message)")));
        return out;
    }
    let Some(columns) = res.fields().filter(|_| res.num_fields() > 0) else {
        out.push(res.command().unwrap_or("OK").to_string());
        return out;
    };
    let visible: Vec<_> = columns.iter().take(res.num_fields()).collect();
    let cells: Vec<Vec<String>> = (0..res.row_count())
        .filter_map(|i| res.row(i))
        .map(|row| row.iter().take(visible.len()).map(|c| c.as_str().map_or_else(|| "NULL".to_string(), |s| s.into_owned())).collect())
        .collect();

    let widths: Vec<usize> = visible.iter().enumerate()
        .map(|(i, f)| cells.iter().map(|r| r[i].chars().count()).fold(f.name.chars().count(), usize::max).min(max_col_width))
        .collect();
    let line = |row: &[String], header: bool| -> String {
        let mut s = String::from("|");
        for ((cell, &w), f) in row.iter().zip(&widths).zip(&visible) {
            let text = clip(cell, w);
            if !header && NUMERIC_TYPES.contains(&f.type_oid) && cell != "NULL" {
                s.push_str(&format!(" {:>w$} |", text));
            } else {
                s.push_str(&format!(" {:<w$} |", text));
            }
        }
        s
    };
    let sep = widths.iter().fold(String::from("+"), |acc, w| acc + &"-".repeat(w + 2) + "+");

    let names: Vec<String> = visible.iter().map(|f| f.name.clone()).collect();
    out.push(sep.clone());
    out.push(line(names.as_slice(), true));
    out.push(sep.clone());
    out.extend(cells.iter().map(|r| line(r.as_slice(), false)));
    out.push(sep);

    let mut summary = format!("rows: {}, cols: {}", cells.len(), visible.len());
    if let Some(tag) = res.command() { summary.push_str(&format!(", {}", tag)); }
    out.push(summary);
    out
}

/// `s` cut to `max` characters, the last one replaced by an ellipsis when cut.
fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some(_) if max == 0 => String::new(),
        Some(_) => s.chars().take(max - 1).chain(std::iter::once('…')).collect(),
    }
}

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_h))) if w > 4 => (w - 4) as usize,
        _ => 80,
    }
}
