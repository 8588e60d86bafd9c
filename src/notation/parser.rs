use std::collections::HashMap;

use super::lexer::{tokenize, Token, TokenKind};
use super::{ElementKind, NotationElement, NotationModel, NotationRelationship, WorkspaceMeta};
use crate::error::{NotationError, NotationResult};

/// Blocks and statements that are accepted but carry nothing for the model.
const IGNORED_STATEMENTS: &[&str] = &[
    "tags",
    "technology",
    "url",
    "properties",
    "perspectives",
    "deploymentEnvironment",
    "deploymentNode",
    "infrastructureNode",
    "softwareSystemInstance",
    "containerInstance",
    "healthCheck",
    "element",
];

/// Workspace level blocks that are skipped entirely.
const IGNORED_WORKSPACE_BLOCKS: &[&str] = &[
    "views",
    "styles",
    "configuration",
    "properties",
    "name",
    "description",
];

/// Description text that stands for "no description".
const NULL_DESCRIPTION: &str = "null";

enum Source {
    Enclosing(usize),
    Named(String, usize, usize),
}

struct PendingRelationship {
    source: Source,
    destination: String,
    line: usize,
    column: usize,
    description: Option<String>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    elements: Vec<NotationElement>,
    identifiers: HashMap<String, usize>,
    pending: Vec<PendingRelationship>,
    anonymous: usize,
}

/// Parse notation text into a workspace model.
///
/// Pure: fails with a located [`NotationError::Parse`] and has no side effects.
pub fn parse(text: &str) -> NotationResult<NotationModel> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        elements: Vec::new(),
        identifiers: HashMap::new(),
        pending: Vec::new(),
        anonymous: 0,
    };
    let workspace = parser.workspace()?;
    let relationships = parser.resolve_relationships()?;
    Ok(NotationModel {
        workspace,
        elements: parser.elements,
        relationships,
    })
}

fn normalize_description(text: String) -> Option<String> {
    if text == NULL_DESCRIPTION {
        None
    } else {
        Some(text)
    }
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_at(token: &Token, message: impl Into<String>) -> NotationError {
        NotationError::Parse {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> NotationError {
        let token = self.peek();
        Self::error_at(
            token,
            format!("expected {}, found {}", expected, token.kind.describe()),
        )
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> NotationResult<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn optional_string(&mut self) -> Option<String> {
        if let TokenKind::Str(value) = &self.peek().kind {
            let value = value.clone();
            self.advance();
            Some(value)
        } else {
            None
        }
    }

    fn skip_strings(&mut self) {
        while matches!(self.peek().kind, TokenKind::Str(_)) {
            self.advance();
        }
    }

    /// A statement ends at a line break, a closing brace or the end of input.
    fn end_statement(&mut self) -> NotationResult<()> {
        match self.peek().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    /// Skip the rest of a statement, including any braced block it opens.
    fn skip_statement(&mut self) -> NotationResult<()> {
        loop {
            match self.peek().kind {
                TokenKind::Newline => {
                    self.advance();
                    return Ok(());
                }
                TokenKind::RBrace | TokenKind::Eof => return Ok(()),
                TokenKind::LBrace => {
                    self.skip_block()?;
                    return self.end_statement();
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn skip_block(&mut self) -> NotationResult<()> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.advance();
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Eof => return Err(Self::error_at(&open, "unterminated block")),
                _ => {}
            }
        }
        Ok(())
    }

    fn workspace(&mut self) -> NotationResult<WorkspaceMeta> {
        self.skip_newlines();
        if !matches!(&self.peek().kind, TokenKind::Word(w) if w == "workspace") {
            return Err(self.unexpected("'workspace'"));
        }
        self.advance();
        let name = self.optional_string().unwrap_or_else(|| "Workspace".to_string());
        let description = self.optional_string();
        self.expect(TokenKind::LBrace, "'{'")?;

        let mut seen_model = false;
        loop {
            self.skip_newlines();
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => return Err(self.unexpected("'}'")),
                TokenKind::Word(w) if w == "model" => {
                    if seen_model {
                        return Err(Self::error_at(&token, "duplicate model block"));
                    }
                    seen_model = true;
                    self.advance();
                    self.expect(TokenKind::LBrace, "'{'")?;
                    self.block(None)?;
                    self.end_statement()?;
                }
                TokenKind::Word(w)
                    if w.starts_with('!') || IGNORED_WORKSPACE_BLOCKS.contains(&w.as_str()) =>
                {
                    self.skip_statement()?;
                }
                _ => return Err(self.unexpected("'model' or '}'")),
            }
        }

        self.skip_newlines();
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected("end of input"));
        }

        Ok(WorkspaceMeta { name, description })
    }

    /// Parse statements up to and including the closing brace of a block.
    fn block(&mut self, parent: Option<usize>) -> NotationResult<()> {
        loop {
            self.skip_newlines();
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(());
                }
                TokenKind::Eof => return Err(self.unexpected("'}'")),
                TokenKind::Arrow => {
                    let Some(enclosing) = parent else {
                        return Err(Self::error_at(
                            &token,
                            "relationship without a source outside an element",
                        ));
                    };
                    self.advance();
                    self.relationship_tail(Source::Enclosing(enclosing))?;
                }
                TokenKind::Word(word) => self.word_statement(word.clone(), &token, parent)?,
                _ => return Err(self.unexpected("a statement")),
            }
        }
    }

    fn word_statement(
        &mut self,
        word: String,
        token: &Token,
        parent: Option<usize>,
    ) -> NotationResult<()> {
        match self.peek_kind_at(1).clone() {
            TokenKind::Equals => {
                self.advance();
                self.advance();
                let target = self.peek().clone();
                let TokenKind::Word(next) = &target.kind else {
                    return Err(self.unexpected("an element kind or relationship"));
                };
                if let Some(kind) = ElementKind::from_keyword(next) {
                    self.advance();
                    return self.element(Some(word), kind, &target, parent);
                }
                if *self.peek_kind_at(1) == TokenKind::Arrow {
                    // named relationship; the name itself is not kept
                    let source = self.relationship_source(next.clone(), &target, parent)?;
                    self.advance();
                    self.advance();
                    return self.relationship_tail(source);
                }
                Err(Self::error_at(
                    &target,
                    format!("unknown element kind '{}'", next),
                ))
            }
            TokenKind::Arrow => {
                let source = self.relationship_source(word, token, parent)?;
                self.advance();
                self.advance();
                self.relationship_tail(source)
            }
            _ => {
                if let Some(kind) = ElementKind::from_keyword(&word) {
                    self.advance();
                    return self.element(None, kind, token, parent);
                }
                match word.as_str() {
                    "group" | "enterprise" => {
                        self.advance();
                        self.skip_strings();
                        self.expect(TokenKind::LBrace, "'{'")?;
                        self.block(parent)?;
                        self.end_statement()
                    }
                    "description" if parent.is_some() => {
                        self.advance();
                        let Some(text) = self.optional_string() else {
                            return Err(self.unexpected("a description string"));
                        };
                        if let Some(index) = parent {
                            self.elements[index].description = normalize_description(text);
                        }
                        self.end_statement()
                    }
                    w if w.starts_with('!') || IGNORED_STATEMENTS.contains(&w) => {
                        self.skip_statement()
                    }
                    _ => Err(Self::error_at(token, format!("unexpected '{}'", word))),
                }
            }
        }
    }

    fn relationship_source(
        &self,
        word: String,
        token: &Token,
        parent: Option<usize>,
    ) -> NotationResult<Source> {
        if word == "this" {
            return parent.map(Source::Enclosing).ok_or_else(|| {
                Self::error_at(token, "'this' used outside an element")
            });
        }
        Ok(Source::Named(word, token.line, token.column))
    }

    fn relationship_tail(&mut self, source: Source) -> NotationResult<()> {
        let target = self.peek().clone();
        let TokenKind::Word(destination) = &target.kind else {
            return Err(self.unexpected("a relationship destination"));
        };
        let destination = destination.clone();
        self.advance();
        let description = self.optional_string();
        self.skip_strings();
        if self.peek().kind == TokenKind::LBrace {
            self.skip_block()?;
        }
        self.end_statement()?;
        self.pending.push(PendingRelationship {
            source,
            destination,
            line: target.line,
            column: target.column,
            description,
        });
        Ok(())
    }

    fn element(
        &mut self,
        identifier: Option<String>,
        kind: ElementKind,
        token: &Token,
        parent: Option<usize>,
    ) -> NotationResult<()> {
        let parent_kind = parent.map(|index| self.elements[index].kind);
        if parent_kind != kind.required_parent() {
            let message = match kind.required_parent() {
                Some(required) => format!(
                    "{} must be declared inside a {}",
                    kind.keyword(),
                    required.keyword()
                ),
                None => format!("{} must be declared at model level", kind.keyword()),
            };
            return Err(Self::error_at(token, message));
        }

        let Some(name) = self.optional_string() else {
            return Err(self.unexpected("an element name"));
        };
        let description = self.optional_string().and_then(normalize_description);
        self.skip_strings();

        let id = match identifier {
            Some(identifier) => {
                if self.identifiers.contains_key(&identifier) {
                    return Err(Self::error_at(
                        token,
                        format!("duplicate identifier '{}'", identifier),
                    ));
                }
                identifier
            }
            None => {
                self.anonymous += 1;
                format!("#{}", self.anonymous)
            }
        };

        let index = self.elements.len();
        let parent_id = parent.map(|p| self.elements[p].id.clone());
        self.identifiers.insert(id.clone(), index);
        self.elements.push(NotationElement {
            id,
            parent_id,
            kind,
            name,
            description,
        });

        if self.peek().kind == TokenKind::LBrace {
            self.advance();
            self.block(Some(index))?;
        }
        self.end_statement()
    }

    fn resolve(&self, name: &str, line: usize, column: usize) -> NotationResult<String> {
        self.identifiers
            .get(name)
            .map(|&index| self.elements[index].id.clone())
            .ok_or_else(|| NotationError::Parse {
                line,
                column,
                message: format!("unknown identifier '{}'", name),
            })
    }

    fn resolve_relationships(&mut self) -> NotationResult<Vec<NotationRelationship>> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|rel| {
                let source_id = match &rel.source {
                    Source::Enclosing(index) => self.elements[*index].id.clone(),
                    Source::Named(name, line, column) => self.resolve(name, *line, *column)?,
                };
                let destination_id = self.resolve(&rel.destination, rel.line, rel.column)?;
                Ok(NotationRelationship {
                    source_id,
                    destination_id,
                    description: rel.description,
                })
            })
            .collect()
    }
}
