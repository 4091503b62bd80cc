use crate::bayes::BayesError;

/// A node declaration from a Hugin `.net` file: a name and its discrete
/// state labels, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct HuginNode {
    pub name: String,
    pub states: Vec<String>,
}

/// A conditional probability table: `potential ( node | parents ) { data =
/// ( ... ); }`. The data list is flattened in the file's nesting order:
/// parent states vary slowest in listed order, node states fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct HuginPotential {
    pub node: String,
    pub parents: Vec<String>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct HuginNet {
    pub nodes: Vec<HuginNode>,
    pub potentials: Vec<HuginPotential>,
}

/// Cursor over the textual Hugin format. The subset understood here is what
/// the discrete-network files use: a `net` header block, `node` blocks with
/// `states`, and `potential` blocks with `data`; unknown attributes are
/// skipped.
struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.src.get(self.pos) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                // Hugin comments run from '%' to end of line.
                Some(b'%') => {
                    while let Some(&b) = self.src.get(self.pos) {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_trivia();
        self.src.get(self.pos).copied()
    }

    fn expect_byte(&mut self, expected: u8) -> Result<(), BayesError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.pos += 1;
                Ok(())
            }
            other => Err(BayesError::Hugin(format!(
                "expected {:?}, found {:?} at byte {}",
                expected as char,
                other.map(|b| b as char),
                self.pos
            ))),
        }
    }

    fn accept_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> Option<String> {
        self.skip_trivia();
        let start = self.pos;
        while matches!(
            self.src.get(self.pos),
            Some(b) if b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-' || *b == b'.'
        ) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        Some(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    fn quoted_string(&mut self) -> Result<String, BayesError> {
        self.expect_byte(b'"')?;
        let start = self.pos;
        while let Some(&b) = self.src.get(self.pos) {
            if b == b'"' {
                let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(text);
            }
            self.pos += 1;
        }
        Err(BayesError::Hugin("unterminated string".to_string()))
    }

    fn number(&mut self) -> Result<f64, BayesError> {
        self.skip_trivia();
        let start = self.pos;
        while matches!(
            self.src.get(self.pos),
            Some(b) if b.is_ascii_digit()
                || *b == b'.'
                || *b == b'-'
                || *b == b'+'
                || *b == b'e'
                || *b == b'E'
        ) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        text.parse::<f64>()
            .map_err(|_| BayesError::Hugin(format!("bad number {text:?} at byte {start}")))
    }

    /// Skips a `{ ... }` block wholesale, respecting nesting and strings.
    fn skip_block(&mut self) -> Result<(), BayesError> {
        self.expect_byte(b'{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.peek() {
                Some(b'{') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b'}') => {
                    depth -= 1;
                    self.pos += 1;
                }
                Some(b'"') => {
                    self.quoted_string()?;
                }
                Some(_) => self.pos += 1,
                None => return Err(BayesError::Hugin("unterminated block".to_string())),
            }
        }
        Ok(())
    }

    /// Skips everything up to and including the next top-level `;`.
    fn skip_statement(&mut self) -> Result<(), BayesError> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some(b';') if depth == 0 => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'(') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b')') => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                Some(b'"') => {
                    self.quoted_string()?;
                }
                Some(_) => self.pos += 1,
                None => return Err(BayesError::Hugin("unterminated statement".to_string())),
            }
        }
    }
}

pub fn parse_net(text: &str) -> Result<HuginNet, BayesError> {
    let mut scanner = Scanner::new(text);
    let mut net = HuginNet::default();

    while let Some(word) = scanner.word() {
        match word.as_str() {
            "net" => {
                scanner.skip_block()?;
            }
            "node" => {
                let name = scanner
                    .word()
                    .ok_or_else(|| BayesError::Hugin("node without a name".to_string()))?;
                let states = parse_node_block(&mut scanner)?;
                net.nodes.push(HuginNode { name, states });
            }
            "potential" => {
                let potential = parse_potential(&mut scanner)?;
                net.potentials.push(potential);
            }
            other => {
                return Err(BayesError::Hugin(format!(
                    "unexpected top-level word {other:?}"
                )));
            }
        }
    }
    Ok(net)
}

fn parse_node_block(scanner: &mut Scanner<'_>) -> Result<Vec<String>, BayesError> {
    scanner.expect_byte(b'{')?;
    let mut states = Vec::new();
    loop {
        if scanner.accept_byte(b'}') {
            break;
        }
        let key = scanner
            .word()
            .ok_or_else(|| BayesError::Hugin("expected attribute in node block".to_string()))?;
        if key == "states" {
            scanner.expect_byte(b'=')?;
            scanner.expect_byte(b'(')?;
            while scanner.peek() == Some(b'"') {
                states.push(scanner.quoted_string()?);
            }
            scanner.expect_byte(b')')?;
            scanner.expect_byte(b';')?;
        } else {
            scanner.expect_byte(b'=')?;
            scanner.skip_statement()?;
        }
    }
    if states.is_empty() {
        return Err(BayesError::Hugin("node without states".to_string()));
    }
    Ok(states)
}

fn parse_potential(scanner: &mut Scanner<'_>) -> Result<HuginPotential, BayesError> {
    scanner.expect_byte(b'(')?;
    let node = scanner
        .word()
        .ok_or_else(|| BayesError::Hugin("potential without a node".to_string()))?;
    let mut parents = Vec::new();
    if scanner.accept_byte(b'|') {
        while let Some(parent) = scanner.word() {
            parents.push(parent);
        }
    }
    scanner.expect_byte(b')')?;

    scanner.expect_byte(b'{')?;
    let mut data = Vec::new();
    loop {
        if scanner.accept_byte(b'}') {
            break;
        }
        let key = scanner
            .word()
            .ok_or_else(|| BayesError::Hugin("expected attribute in potential".to_string()))?;
        if key == "data" {
            scanner.expect_byte(b'=')?;
            parse_data_list(scanner, &mut data)?;
            scanner.expect_byte(b';')?;
        } else {
            scanner.expect_byte(b'=')?;
            scanner.skip_statement()?;
        }
    }
    if data.is_empty() {
        return Err(BayesError::Hugin(format!("potential for {node} has no data")));
    }
    Ok(HuginPotential {
        node,
        parents,
        data,
    })
}

/// Reads a possibly-nested parenthesised list of floats and flattens it in
/// order.
fn parse_data_list(scanner: &mut Scanner<'_>, out: &mut Vec<f64>) -> Result<(), BayesError> {
    scanner.expect_byte(b'(')?;
    loop {
        match scanner.peek() {
            Some(b')') => {
                scanner.pos += 1;
                return Ok(());
            }
            Some(b'(') => parse_data_list(scanner, out)?,
            Some(_) => out.push(scanner.number()?),
            None => return Err(BayesError::Hugin("unterminated data list".to_string())),
        }
    }
}
