/*!
Fixtures d'import CSV

Construit un fichier CSV ligne par ligne ; les cellules contenant une virgule,
un guillemet ou un saut de ligne sont entourées de guillemets.
*/

/// Active `env_logger` une seule fois : rend visibles les logs `[MOCK]` du client simulé
/// (publications refusées notamment) dans la sortie des tests.
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

#[derive(Debug, Clone, Default)]
pub struct CsvFixture {
    lines: Vec<String>,
}

impl CsvFixture {
    pub fn new(headers: &[&str]) -> Self {
        Self { lines: vec![join(headers)] }
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.lines.push(join(cells));
        self
    }

    /// Ligne brute, sans échappement (pour les cas malformés).
    pub fn raw_line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn join(cells: &[&str]) -> String {
    cells.iter().map(|c| escape(c)).collect::<Vec<_>>().join(",")
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_cells_that_need_it() {
        let csv = CsvFixture::new(&["id", "name"])
            .row(&["CAM-1", "Gate, North"])
            .row(&["CAM-2", "The \"Yard\""])
            .build();
        assert_eq!(csv, "id,name\nCAM-1,\"Gate, North\"\nCAM-2,\"The \"\"Yard\"\"\"\n");
    }
}
