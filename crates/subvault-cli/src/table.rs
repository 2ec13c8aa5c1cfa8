use std::io::IsTerminal;

use comfy_table::{presets::NOTHING, Attribute, Cell, Table};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CliTableTheme {
    pub use_color: bool,
}

impl CliTableTheme {
    pub(crate) fn detect() -> Self {
        let is_tty = std::io::stdout().is_terminal();
        let no_color = std::env::var_os("NO_COLOR").is_some();
        resolve_table_theme(is_tty, no_color)
    }

    pub(crate) fn new_data_table(self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        let header_cells: Vec<Cell> = headers.iter().map(|h| self.header_cell(h)).collect();
        table.set_header(header_cells);
        table
    }

    pub(crate) fn new_kv_table(self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table
    }

    /// Headers and keys are bold when colors are allowed.
    fn header_cell(self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.use_color {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }
}

fn resolve_table_theme(is_tty: bool, no_color: bool) -> CliTableTheme {
    CliTableTheme {
        use_color: is_tty && !no_color,
    }
}

pub(crate) fn add_kv_row(
    table: &mut Table,
    theme: CliTableTheme,
    field: &str,
    value: impl ToString,
) {
    table.add_row(vec![theme.header_cell(field), Cell::new(value.to_string())]);
}
