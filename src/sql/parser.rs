//! SQL Parser
//!
//! This module parses SQL tokens into an AST using recursive descent.
//! Clause-local words (ISOLATION, CASCADE, OVER, ...) are not reserved:
//! they arrive as identifiers and are matched with `check_keyword`.

use super::ast::*;
use super::lexer::Lexer;
use super::token::Token;
use crate::catalog::types::MAX_DECIMAL_PRECISION;
use crate::catalog::{DataType, ReferentialAction};
use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

/// SQL Parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    /// Number of `?` placeholders seen so far
    positional_params: usize,
}

impl Parser {
    /// Create a new parser from a SQL string
    pub fn new(sql: &str) -> Result<Self> {
        let mut lexer = Lexer::new(sql);
        let tokens = lexer.tokenize()?;

        Ok(Self {
            tokens,
            position: 0,
            positional_params: 0,
        })
    }

    /// Parse a single SQL statement
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;

        // Consume optional semicolon
        if self.check(&Token::Semicolon) {
            self.advance();
        } else if !self.is_at_end() {
            return Err(Error::UnexpectedToken {
                expected: "end of statement".to_string(),
                found: format!("{}", self.current()),
            });
        }

        Ok(stmt)
    }

    /// Parse multiple SQL statements
    pub fn parse_all(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();

        loop {
            while self.check(&Token::Semicolon) {
                self.advance();
            }
            if self.is_at_end() {
                break;
            }
            statements.push(self.parse()?);
        }

        Ok(statements)
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current() {
            Token::Select | Token::With | Token::LParen => {
                self.parse_query().map(|q| Statement::Query(Box::new(q)))
            }
            Token::Insert => self.parse_insert().map(Statement::Insert),
            Token::Update => self.parse_update().map(Statement::Update),
            Token::Delete => self.parse_delete().map(Statement::Delete),
            Token::Create => self.parse_create(),
            Token::Drop => self.parse_drop(),
            Token::Alter => self.parse_alter().map(Statement::AlterTable),
            Token::Begin => self.parse_begin(),
            Token::Commit => self.parse_commit(),
            Token::Rollback => self.parse_rollback(),
            Token::Set => self.parse_set(),
            _ if self.check_keyword("start") => self.parse_begin(),
            _ if self.check_keyword("refresh") => self.parse_refresh(),
            _ => Err(Error::UnexpectedToken {
                expected: "SELECT, WITH, INSERT, UPDATE, DELETE, CREATE, ALTER, DROP, BEGIN, COMMIT, ROLLBACK, or SET"
                    .to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    // ========== Queries ==========

    fn parse_query(&mut self) -> Result<Query> {
        let with = if self.check(&Token::With) {
            Some(self.parse_with()?)
        } else {
            None
        };

        let body = self.parse_set_expr()?;

        // ORDER BY clause
        let order_by = if self.check(&Token::Order) {
            self.advance();
            self.expect(&Token::By)?;
            self.parse_order_by_list()?
        } else {
            Vec::new()
        };

        // LIMIT clause
        let limit = if self.check(&Token::Limit) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };

        // OFFSET clause
        let offset = if self.check(&Token::Offset) {
            self.advance();
            let offset = self.parse_expr()?;
            if self.check_keyword("rows") || self.check_keyword("row") {
                self.advance();
            }
            Some(offset)
        } else {
            None
        };

        Ok(Query {
            with,
            body,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_with(&mut self) -> Result<With> {
        self.expect(&Token::With)?;
        let recursive = self.consume_keyword("recursive");

        let mut ctes = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let columns = if self.check(&Token::LParen) {
                self.advance();
                let cols = self.parse_identifier_list()?;
                self.expect(&Token::RParen)?;
                cols
            } else {
                Vec::new()
            };
            self.expect(&Token::As)?;
            self.expect(&Token::LParen)?;
            let query = self.parse_query()?;
            self.expect(&Token::RParen)?;
            ctes.push(Cte {
                name,
                columns,
                query: Box::new(query),
            });

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(With { recursive, ctes })
    }

    /// UNION and EXCEPT associate left; INTERSECT binds tighter
    fn parse_set_expr(&mut self) -> Result<SetExpr> {
        let mut left = self.parse_intersect_term()?;

        loop {
            let op = match self.current() {
                Token::Union => SetOperator::Union,
                Token::Except => SetOperator::Except,
                _ => break,
            };
            self.advance();
            let all = self.parse_set_quantifier();
            let right = self.parse_intersect_term()?;
            left = SetExpr::SetOperation {
                op,
                all,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_intersect_term(&mut self) -> Result<SetExpr> {
        let mut left = self.parse_set_primary()?;

        while self.check(&Token::Intersect) {
            self.advance();
            let all = self.parse_set_quantifier();
            let right = self.parse_set_primary()?;
            left = SetExpr::SetOperation {
                op: SetOperator::Intersect,
                all,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_set_quantifier(&mut self) -> bool {
        if self.check(&Token::All) {
            self.advance();
            true
        } else {
            if self.check(&Token::Distinct) {
                self.advance();
            }
            false
        }
    }

    fn parse_set_primary(&mut self) -> Result<SetExpr> {
        match self.current() {
            Token::Select => Ok(SetExpr::Select(Box::new(self.parse_select()?))),
            Token::LParen => {
                self.advance();
                let query = self.parse_query()?;
                self.expect(&Token::RParen)?;
                Ok(SetExpr::Query(Box::new(query)))
            }
            _ => Err(Error::UnexpectedToken {
                expected: "SELECT or (".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    // ========== SELECT Statement ==========

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(&Token::Select)?;

        let mut stmt = SelectStatement::default();

        // DISTINCT
        if self.check(&Token::Distinct) {
            self.advance();
            stmt.distinct = true;
        } else if self.check(&Token::All) {
            self.advance();
        }

        // Select list
        stmt.columns = self.parse_select_list()?;

        // FROM clause
        if self.check(&Token::From) {
            stmt.from = Some(self.parse_from_clause()?);
        }

        // WHERE clause
        if self.check(&Token::Where) {
            self.advance();
            stmt.where_clause = Some(self.parse_expr()?);
        }

        // GROUP BY clause
        if self.check(&Token::Group) {
            self.advance();
            self.expect(&Token::By)?;
            stmt.group_by = self.parse_expr_list()?;
        }

        // HAVING clause
        if self.check(&Token::Having) {
            self.advance();
            stmt.having = Some(self.parse_expr()?);
        }

        Ok(stmt)
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();

        loop {
            items.push(self.parse_select_item()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance(); // consume comma
        }

        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        // Check for *
        if self.check(&Token::Asterisk) {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }

        // Check for table.*
        if let Token::Identifier(name) = self.current().clone() {
            if self.peek() == Some(&Token::Dot) && self.peek_nth(2) == Some(&Token::Asterisk) {
                self.advance();
                self.advance();
                self.advance();
                return Ok(SelectItem::QualifiedWildcard(name));
            }
        }

        // Parse as expression
        let expr = self.parse_expr()?;

        // Check for alias
        let alias = if self.check(&Token::As) {
            self.advance();
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(name) = self.current().clone() {
            // Alias without AS
            self.advance();
            Some(name)
        } else {
            None
        };

        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_from_clause(&mut self) -> Result<FromClause> {
        self.expect(&Token::From)?;

        let table = self.parse_table_ref()?;
        let mut joins = Vec::new();

        // Parse JOINs; a comma is an implicit CROSS JOIN
        loop {
            if self.is_join_keyword() {
                joins.push(self.parse_join()?);
            } else if self.check(&Token::Comma) {
                self.advance();
                joins.push(Join {
                    join_type: JoinType::Cross,
                    table: self.parse_table_ref()?,
                    constraint: JoinConstraint::None,
                });
            } else {
                break;
            }
        }

        Ok(FromClause { table, joins })
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        if self.check(&Token::LParen) {
            self.advance();
            let query = self.parse_query()?;
            self.expect(&Token::RParen)?;
            if self.check(&Token::As) {
                self.advance();
            }
            let alias = self.expect_identifier().map_err(|_| {
                Error::ParseError("subquery in FROM must have an alias".to_string())
            })?;
            return Ok(TableRef::Subquery {
                query: Box::new(query),
                alias,
            });
        }

        let name = self.expect_identifier()?;
        let alias = self.parse_optional_alias()?;

        Ok(TableRef::Named { name, alias })
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>> {
        if self.check(&Token::As) {
            self.advance();
            Ok(Some(self.expect_identifier()?))
        } else if let Token::Identifier(name) = self.current().clone() {
            self.advance();
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    fn is_join_keyword(&self) -> bool {
        matches!(
            self.current(),
            Token::Join | Token::Inner | Token::Left | Token::Right | Token::Full | Token::Cross
        )
    }

    fn parse_join(&mut self) -> Result<Join> {
        let join_type = self.parse_join_type()?;
        self.expect(&Token::Join)?;
        let table = self.parse_table_ref()?;

        let constraint = if self.check(&Token::On) {
            self.advance();
            JoinConstraint::On(self.parse_expr()?)
        } else if self.check(&Token::Using) {
            self.advance();
            self.expect(&Token::LParen)?;
            let columns = self.parse_identifier_list()?;
            self.expect(&Token::RParen)?;
            JoinConstraint::Using(columns)
        } else {
            JoinConstraint::None
        };

        if join_type != JoinType::Cross && constraint == JoinConstraint::None {
            return Err(Error::ParseError(format!(
                "{} JOIN requires an ON or USING clause",
                join_type
            )));
        }

        Ok(Join {
            join_type,
            table,
            constraint,
        })
    }

    fn parse_join_type(&mut self) -> Result<JoinType> {
        let join_type = match self.current() {
            Token::Inner => JoinType::Inner,
            Token::Left => JoinType::Left,
            Token::Right => JoinType::Right,
            Token::Full => JoinType::Full,
            Token::Cross => JoinType::Cross,
            // Just JOIN means INNER JOIN
            _ => return Ok(JoinType::Inner),
        };
        self.advance();
        if matches!(join_type, JoinType::Left | JoinType::Right | JoinType::Full)
            && self.check(&Token::Outer)
        {
            self.advance();
        }
        Ok(join_type)
    }

    fn parse_order_by_list(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();

        loop {
            let expr = self.parse_expr()?;
            let ascending = if self.check(&Token::Desc) {
                self.advance();
                false
            } else {
                if self.check(&Token::Asc) {
                    self.advance();
                }
                true
            };

            let nulls_first = if self.consume_keyword("nulls") {
                if self.consume_keyword("first") {
                    Some(true)
                } else {
                    self.expect_keyword("last")?;
                    Some(false)
                }
            } else {
                None
            };

            items.push(OrderByItem {
                expr,
                ascending,
                nulls_first,
            });

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(items)
    }

    // ========== INSERT Statement ==========

    fn parse_insert(&mut self) -> Result<InsertStatement> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;

        let table_name = self.expect_identifier()?;

        // Optional column list
        let columns = if self.check(&Token::LParen) && self.peek() != Some(&Token::Select) {
            self.advance();
            let cols = self.parse_identifier_list()?;
            self.expect(&Token::RParen)?;
            Some(cols)
        } else {
            None
        };

        if !self.check(&Token::Values) {
            let query = self.parse_query()?;
            return Ok(InsertStatement {
                table_name,
                columns,
                source: InsertSource::Query(Box::new(query)),
            });
        }
        self.advance();

        // Parse value rows
        let mut values = Vec::new();
        loop {
            self.expect(&Token::LParen)?;
            let row = self.parse_expr_list()?;
            self.expect(&Token::RParen)?;
            values.push(row);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(InsertStatement {
            table_name,
            columns,
            source: InsertSource::Values(values),
        })
    }

    // ========== UPDATE Statement ==========

    fn parse_update(&mut self) -> Result<UpdateStatement> {
        self.expect(&Token::Update)?;

        let table_name = self.expect_identifier()?;
        let alias = self.parse_optional_alias()?;

        self.expect(&Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let mut column = self.expect_identifier()?;
            if self.check(&Token::Dot) {
                self.advance();
                column = self.expect_identifier()?;
            }
            self.expect(&Token::Eq)?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        let where_clause = self.parse_optional_where()?;

        Ok(UpdateStatement {
            table_name,
            alias,
            assignments,
            where_clause,
        })
    }

    // ========== DELETE Statement ==========

    fn parse_delete(&mut self) -> Result<DeleteStatement> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;

        let table_name = self.expect_identifier()?;
        let alias = self.parse_optional_alias()?;
        let where_clause = self.parse_optional_where()?;

        Ok(DeleteStatement {
            table_name,
            alias,
            where_clause,
        })
    }

    fn parse_optional_where(&mut self) -> Result<Option<Expr>> {
        if self.check(&Token::Where) {
            self.advance();
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    // ========== CREATE Statement ==========

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(&Token::Create)?;

        let or_replace = if self.check(&Token::Or) {
            self.advance();
            self.expect_keyword("replace")?;
            true
        } else {
            false
        };

        match self.current() {
            Token::Table if !or_replace => {
                self.parse_create_table().map(Statement::CreateTable)
            }
            Token::Index | Token::Unique if !or_replace => {
                self.parse_create_index().map(Statement::CreateIndex)
            }
            Token::View => self.parse_create_view(or_replace, false),
            _ if self.check_keyword("materialized") => {
                self.advance();
                self.parse_create_view(or_replace, true)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "TABLE, INDEX, or VIEW".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStatement> {
        self.expect(&Token::Table)?;

        let if_not_exists = self.parse_if_not_exists()?;
        let table_name = self.expect_identifier()?;

        self.expect(&Token::LParen)?;

        let mut columns = Vec::new();
        let mut constraints = Vec::new();

        loop {
            // Check for table constraint
            if self.check(&Token::Primary)
                || self.check(&Token::Foreign)
                || self.check(&Token::Unique)
                || self.check(&Token::Check)
                || self.check(&Token::Constraint)
            {
                constraints.push(self.parse_table_constraint()?);
            } else {
                columns.push(self.parse_column_def()?);
            }

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(&Token::RParen)?;

        Ok(CreateTableStatement {
            table_name,
            columns,
            constraints,
            if_not_exists,
        })
    }

    fn parse_if_not_exists(&mut self) -> Result<bool> {
        if self.check(&Token::If) {
            self.advance();
            self.expect(&Token::Not)?;
            self.expect(&Token::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.check(&Token::If) {
            self.advance();
            self.expect(&Token::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_create_index(&mut self) -> Result<CreateIndexStatement> {
        let unique = if self.check(&Token::Unique) {
            self.advance();
            true
        } else {
            false
        };

        self.expect(&Token::Index)?;

        let if_not_exists = self.parse_if_not_exists()?;
        let index_name = self.expect_identifier()?;
        self.expect(&Token::On)?;
        let table_name = self.expect_identifier()?;

        self.expect(&Token::LParen)?;
        let columns = self.parse_identifier_list()?;
        self.expect(&Token::RParen)?;

        Ok(CreateIndexStatement {
            index_name,
            table_name,
            columns,
            unique,
            if_not_exists,
        })
    }

    fn parse_create_view(&mut self, or_replace: bool, materialized: bool) -> Result<Statement> {
        self.expect(&Token::View)?;
        let name = self.expect_identifier()?;

        let columns = if self.check(&Token::LParen) {
            self.advance();
            let cols = self.parse_identifier_list()?;
            self.expect(&Token::RParen)?;
            cols
        } else {
            Vec::new()
        };

        self.expect(&Token::As)?;
        let query = self.parse_query()?;

        Ok(Statement::CreateView(CreateViewStatement {
            name,
            columns,
            query: Box::new(query),
            or_replace,
            materialized,
        }))
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_identifier()?;

        let mut column = if self.check_keyword("serial") || self.check_keyword("bigserial") {
            let data_type = if self.check_keyword("serial") {
                DataType::Integer
            } else {
                DataType::BigInt
            };
            self.advance();
            let mut column = ColumnDef::new(name, data_type);
            column.auto_increment = true;
            column.not_null = true;
            column
        } else {
            ColumnDef::new(name, self.parse_data_type()?)
        };

        // Parse column constraints
        loop {
            if self.check(&Token::Constraint) {
                // Inline constraint names are accepted and dropped
                self.advance();
                self.expect_identifier()?;
            } else if self.check(&Token::Not) {
                self.advance();
                self.expect(&Token::Null)?;
                column.not_null = true;
            } else if self.check(&Token::Null) {
                self.advance();
                // NULL is allowed (default)
            } else if self.check(&Token::Default) {
                self.advance();
                column.default = Some(self.parse_additive_expr()?);
            } else if self.check(&Token::Primary) {
                self.advance();
                self.expect(&Token::Key)?;
                column.primary_key = true;
                column.not_null = true;
            } else if self.check(&Token::Unique) {
                self.advance();
                column.unique = true;
            } else if self.check(&Token::Check) {
                self.advance();
                self.expect(&Token::LParen)?;
                column.check = Some(self.parse_expr()?);
                self.expect(&Token::RParen)?;
            } else if self.check(&Token::References) {
                column.references = Some(self.parse_references()?);
            } else if self.check_keyword("auto_increment") || self.check_keyword("autoincrement")
            {
                self.advance();
                column.auto_increment = true;
            } else {
                break;
            }
        }

        if column.auto_increment && !column.data_type.is_integer() {
            return Err(Error::ParseError(format!(
                "AUTO_INCREMENT column '{}' must have an integer type",
                column.name
            )));
        }

        Ok(column)
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let dt = match self.current().clone() {
            Token::Int | Token::Integer => DataType::Integer,
            Token::BigInt => DataType::BigInt,
            Token::SmallInt => DataType::SmallInt,
            Token::Float => DataType::Float,
            Token::Double => {
                self.advance();
                self.consume_keyword("precision");
                return Ok(DataType::Double);
            }
            Token::Decimal | Token::Numeric => {
                self.advance();
                if self.check(&Token::LParen) {
                    self.advance();
                    let precision = self.expect_integer()?;
                    let scale = if self.check(&Token::Comma) {
                        self.advance();
                        self.expect_integer()?
                    } else {
                        0
                    };
                    self.expect(&Token::RParen)?;
                    if precision < 1 || precision > MAX_DECIMAL_PRECISION as i64 {
                        return Err(Error::ParseError(format!(
                            "DECIMAL precision must be between 1 and {}",
                            MAX_DECIMAL_PRECISION
                        )));
                    }
                    if scale < 0 || scale > precision {
                        return Err(Error::ParseError(
                            "DECIMAL scale must be between 0 and the precision".to_string(),
                        ));
                    }
                    return Ok(DataType::Decimal(precision as u8, scale as u8));
                }
                return Ok(DataType::Decimal(10, 0));
            }
            Token::Varchar => {
                self.advance();
                if self.check(&Token::LParen) {
                    let len = self.parse_type_length()?;
                    return Ok(DataType::Varchar(len));
                }
                return Ok(DataType::Text);
            }
            Token::Char => {
                self.advance();
                if self.check(&Token::LParen) {
                    let len = self.parse_type_length()?;
                    return Ok(DataType::Char(len));
                }
                return Ok(DataType::Char(1));
            }
            Token::Text => DataType::Text,
            Token::Boolean => DataType::Boolean,
            Token::Date => DataType::Date,
            Token::Timestamp => DataType::Timestamp,
            Token::Identifier(name) => match name.as_str() {
                "real" => DataType::Float,
                "bool" => DataType::Boolean,
                "datetime" => DataType::Timestamp,
                _ => {
                    return Err(Error::UnexpectedToken {
                        expected: "data type".to_string(),
                        found: format!("{}", self.current()),
                    })
                }
            },
            _ => {
                return Err(Error::UnexpectedToken {
                    expected: "data type".to_string(),
                    found: format!("{}", self.current()),
                });
            }
        };
        self.advance();

        Ok(dt)
    }

    fn parse_type_length(&mut self) -> Result<usize> {
        self.expect(&Token::LParen)?;
        let len = self.expect_integer()?;
        self.expect(&Token::RParen)?;
        if len < 1 {
            return Err(Error::ParseError(
                "character length must be at least 1".to_string(),
            ));
        }
        Ok(len as usize)
    }

    fn parse_table_constraint(&mut self) -> Result<TableConstraint> {
        // Optional constraint name
        let name = if self.check(&Token::Constraint) {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };

        if self.check(&Token::Primary) {
            self.advance();
            self.expect(&Token::Key)?;
            let columns = self.parse_paren_identifiers()?;
            Ok(TableConstraint::PrimaryKey { name, columns })
        } else if self.check(&Token::Unique) {
            self.advance();
            let columns = self.parse_paren_identifiers()?;
            Ok(TableConstraint::Unique { name, columns })
        } else if self.check(&Token::Foreign) {
            self.advance();
            self.expect(&Token::Key)?;
            let columns = self.parse_paren_identifiers()?;
            let clause = self.parse_references()?;
            if !clause.ref_columns.is_empty() && clause.ref_columns.len() != columns.len() {
                return Err(Error::ParseError(
                    "foreign key column count does not match referenced columns".to_string(),
                ));
            }
            Ok(TableConstraint::ForeignKey {
                name,
                columns,
                clause,
            })
        } else if self.check(&Token::Check) {
            self.advance();
            self.expect(&Token::LParen)?;
            let expr = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            Ok(TableConstraint::Check { name, expr })
        } else {
            Err(Error::UnexpectedToken {
                expected: "PRIMARY, UNIQUE, FOREIGN, or CHECK".to_string(),
                found: format!("{}", self.current()),
            })
        }
    }

    fn parse_paren_identifiers(&mut self) -> Result<Vec<String>> {
        self.expect(&Token::LParen)?;
        let columns = self.parse_identifier_list()?;
        self.expect(&Token::RParen)?;
        Ok(columns)
    }

    /// `REFERENCES t [(cols)] [ON DELETE a] [ON UPDATE a] [DEFERRABLE ...]`
    fn parse_references(&mut self) -> Result<ForeignKeyClause> {
        self.expect(&Token::References)?;
        let ref_table = self.expect_identifier()?;
        let ref_columns = if self.check(&Token::LParen) {
            self.parse_paren_identifiers()?
        } else {
            Vec::new()
        };

        let mut clause = ForeignKeyClause {
            ref_table,
            ref_columns,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            deferred: false,
        };

        loop {
            if self.check(&Token::On) {
                self.advance();
                if self.check(&Token::Delete) {
                    self.advance();
                    clause.on_delete = self.parse_referential_action()?;
                } else {
                    self.expect(&Token::Update)?;
                    clause.on_update = self.parse_referential_action()?;
                }
            } else if self.consume_keyword("deferrable") {
                if self.consume_keyword("initially") {
                    if self.consume_keyword("deferred") {
                        clause.deferred = true;
                    } else {
                        self.expect_keyword("immediate")?;
                    }
                }
            } else if self.check(&Token::Not) && self.peek_is_keyword("deferrable") {
                self.advance();
                self.advance();
            } else if self.consume_keyword("initially") {
                if self.consume_keyword("deferred") {
                    clause.deferred = true;
                } else {
                    self.expect_keyword("immediate")?;
                }
            } else {
                break;
            }
        }

        Ok(clause)
    }

    fn parse_referential_action(&mut self) -> Result<ReferentialAction> {
        if self.consume_keyword("cascade") {
            Ok(ReferentialAction::Cascade)
        } else if self.consume_keyword("restrict") {
            Ok(ReferentialAction::Restrict)
        } else if self.consume_keyword("no") {
            self.expect_keyword("action")?;
            Ok(ReferentialAction::NoAction)
        } else if self.check(&Token::Set) {
            self.advance();
            self.expect(&Token::Null)?;
            Ok(ReferentialAction::SetNull)
        } else {
            Err(Error::UnexpectedToken {
                expected: "CASCADE, RESTRICT, NO ACTION, or SET NULL".to_string(),
                found: format!("{}", self.current()),
            })
        }
    }

    // ========== ALTER Statement ==========

    fn parse_alter(&mut self) -> Result<AlterTableStatement> {
        self.expect(&Token::Alter)?;
        self.expect(&Token::Table)?;
        let table_name = self.expect_identifier()?;

        let action = match self.current().clone() {
            Token::Identifier(word) if word == "add" => {
                self.advance();
                if self.check(&Token::Constraint)
                    || self.check(&Token::Primary)
                    || self.check(&Token::Unique)
                    || self.check(&Token::Foreign)
                    || self.check(&Token::Check)
                {
                    AlterTableAction::AddConstraint(self.parse_table_constraint()?)
                } else {
                    self.consume_keyword("column");
                    AlterTableAction::AddColumn(self.parse_column_def()?)
                }
            }
            Token::Drop => {
                self.advance();
                if self.check(&Token::Constraint) {
                    self.advance();
                    AlterTableAction::DropConstraint(self.expect_identifier()?)
                } else {
                    self.consume_keyword("column");
                    let if_exists = self.parse_if_exists()?;
                    let name = self.expect_identifier()?;
                    AlterTableAction::DropColumn { name, if_exists }
                }
            }
            Token::Alter => {
                self.advance();
                self.consume_keyword("column");
                let name = self.expect_identifier()?;
                self.parse_alter_column(name)?
            }
            Token::Identifier(word) if word == "modify" => {
                self.advance();
                self.consume_keyword("column");
                let name = self.expect_identifier()?;
                let data_type = self.parse_data_type()?;
                AlterTableAction::AlterColumnType { name, data_type }
            }
            Token::Identifier(word) if word == "rename" => {
                self.advance();
                self.expect_keyword("to")?;
                AlterTableAction::RenameTable(self.expect_identifier()?)
            }
            _ => {
                return Err(Error::UnexpectedToken {
                    expected: "ADD, DROP, ALTER, MODIFY, or RENAME".to_string(),
                    found: format!("{}", self.current()),
                })
            }
        };

        Ok(AlterTableStatement { table_name, action })
    }

    fn parse_alter_column(&mut self, name: String) -> Result<AlterTableAction> {
        if self.consume_keyword("type") {
            let data_type = self.parse_data_type()?;
            return Ok(AlterTableAction::AlterColumnType { name, data_type });
        }

        if self.check(&Token::Set) {
            self.advance();
            if self.check(&Token::Not) {
                self.advance();
                self.expect(&Token::Null)?;
                return Ok(AlterTableAction::SetNotNull(name));
            }
            if self.check(&Token::Default) {
                self.advance();
                let default = Some(self.parse_additive_expr()?);
                return Ok(AlterTableAction::SetDefault { name, default });
            }
            self.expect_keyword("data")?;
            self.expect_keyword("type")?;
            let data_type = self.parse_data_type()?;
            return Ok(AlterTableAction::AlterColumnType { name, data_type });
        }

        self.expect(&Token::Drop)?;
        if self.check(&Token::Not) {
            self.advance();
            self.expect(&Token::Null)?;
            return Ok(AlterTableAction::DropNotNull(name));
        }
        self.expect(&Token::Default)?;
        Ok(AlterTableAction::SetDefault {
            name,
            default: None,
        })
    }

    // ========== DROP Statement ==========

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(&Token::Drop)?;

        match self.current() {
            Token::Table => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let table_name = self.expect_identifier()?;

                let cascade = if self.consume_keyword("cascade") {
                    true
                } else {
                    self.consume_keyword("restrict");
                    false
                };

                Ok(Statement::DropTable(DropTableStatement {
                    table_name,
                    if_exists,
                    cascade,
                }))
            }
            Token::Index => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_identifier()?;
                Ok(Statement::DropIndex { name, if_exists })
            }
            Token::View => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_identifier()?;
                Ok(Statement::DropView {
                    name,
                    if_exists,
                    materialized: false,
                })
            }
            _ if self.check_keyword("materialized") => {
                self.advance();
                self.expect(&Token::View)?;
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_identifier()?;
                Ok(Statement::DropView {
                    name,
                    if_exists,
                    materialized: true,
                })
            }
            _ => Err(Error::UnexpectedToken {
                expected: "TABLE, INDEX, or VIEW".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    fn parse_refresh(&mut self) -> Result<Statement> {
        self.expect_keyword("refresh")?;
        self.expect_keyword("materialized")?;
        self.expect(&Token::View)?;
        Ok(Statement::RefreshMaterializedView(self.expect_identifier()?))
    }

    // ========== Expression Parsing ==========

    pub(crate) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_and_expr()?;

        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_not_expr()?;

        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_not_expr()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_not_expr()?;
            Ok(Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
            })
        } else {
            self.parse_comparison_expr()
        }
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr> {
        let left = self.parse_additive_expr()?;

        // IS NULL / IS NOT NULL
        if self.check(&Token::Is) {
            self.advance();
            if self.check(&Token::Not) {
                self.advance();
                self.expect(&Token::Null)?;
                return Ok(Expr::IsNotNull(Box::new(left)));
            } else {
                self.expect(&Token::Null)?;
                return Ok(Expr::IsNull(Box::new(left)));
            }
        }

        // NOT BETWEEN, NOT IN, NOT LIKE
        let negated = self.check(&Token::Not)
            && matches!(
                self.peek(),
                Some(Token::Between) | Some(Token::In) | Some(Token::Like)
            );
        if negated {
            self.advance();
        }

        // BETWEEN
        if self.check(&Token::Between) {
            self.advance();
            let low = self.parse_additive_expr()?;
            self.expect(&Token::And)?;
            let high = self.parse_additive_expr()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        // IN
        if self.check(&Token::In) {
            self.advance();
            self.expect(&Token::LParen)?;
            if self.check(&Token::Select) || self.check(&Token::With) {
                let subquery = self.parse_query()?;
                self.expect(&Token::RParen)?;
                return Ok(Expr::InSubquery {
                    expr: Box::new(left),
                    subquery: Box::new(subquery),
                    negated,
                });
            }
            let list = self.parse_expr_list()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        // LIKE
        if self.check(&Token::Like) {
            self.advance();
            let pattern = self.parse_additive_expr()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }

        // Comparison operators
        let op = match self.current() {
            Token::Eq => Some(BinaryOperator::Eq),
            Token::Neq => Some(BinaryOperator::Neq),
            Token::Lt => Some(BinaryOperator::Lt),
            Token::Gt => Some(BinaryOperator::Gt),
            Token::Lte => Some(BinaryOperator::Lte),
            Token::Gte => Some(BinaryOperator::Gte),
            _ => None,
        };

        let Some(op) = op else {
            return Ok(left);
        };
        self.advance();

        // expr op ANY|SOME|ALL (subquery)
        let quantifier = if self.check(&Token::Any) || self.check_keyword("some") {
            Some(Quantifier::Any)
        } else if self.check(&Token::All) {
            Some(Quantifier::All)
        } else {
            None
        };
        if let Some(quantifier) = quantifier {
            self.advance();
            self.expect(&Token::LParen)?;
            let subquery = self.parse_query()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::Quantified {
                expr: Box::new(left),
                op,
                quantifier,
                subquery: Box::new(subquery),
            });
        }

        let right = self.parse_additive_expr()?;
        Ok(Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_additive_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative_expr()?;

        loop {
            let op = match self.current() {
                Token::Plus => Some(BinaryOperator::Add),
                Token::Minus => Some(BinaryOperator::Sub),
                Token::Concat => Some(BinaryOperator::Concat),
                _ => None,
            };

            if let Some(op) = op {
                self.advance();
                let right = self.parse_multiplicative_expr()?;
                left = Expr::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary_expr()?;

        loop {
            let op = match self.current() {
                Token::Asterisk => Some(BinaryOperator::Mul),
                Token::Slash => Some(BinaryOperator::Div),
                Token::Percent => Some(BinaryOperator::Mod),
                _ => None,
            };

            if let Some(op) = op {
                self.advance();
                let right = self.parse_unary_expr()?;
                left = Expr::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        match self.current() {
            Token::Minus => {
                // i64::MIN only fits once the sign is attached
                if let Some(Token::DecimalLiteral(digits)) = self.peek() {
                    if let Ok(n) = format!("-{}", digits).parse::<i64>() {
                        self.advance();
                        self.advance();
                        return Ok(Expr::Literal(Literal::Integer(n)));
                    }
                }
                self.advance();
                let expr = self.parse_unary_expr()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(expr),
                })
            }
            Token::Plus => {
                self.advance();
                let expr = self.parse_unary_expr()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOperator::Plus,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.current().clone() {
            // Literals
            Token::IntegerLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(n)))
            }
            Token::DecimalLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Decimal(s)))
            }
            Token::FloatLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(n)))
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }

            // Parameters
            Token::Parameter(n) => {
                self.advance();
                Ok(Expr::Parameter(n))
            }
            Token::QuestionMark => {
                self.advance();
                self.positional_params += 1;
                Ok(Expr::Parameter(self.positional_params))
            }

            // Parenthesized expression or subquery
            Token::LParen => {
                self.advance();
                if self.check(&Token::Select) || self.check(&Token::With) {
                    let subquery = self.parse_query()?;
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Subquery(Box::new(subquery)))
                } else {
                    let expr = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Nested(Box::new(expr)))
                }
            }

            // EXISTS
            Token::Exists => {
                self.advance();
                self.expect(&Token::LParen)?;
                let subquery = self.parse_query()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Exists(Box::new(subquery)))
            }

            // CASE
            Token::Case => self.parse_case_expr(),

            // Typed literals: DATE '2024-01-01', TIMESTAMP '...'
            Token::Date | Token::Timestamp
                if matches!(self.peek(), Some(Token::StringLiteral(_))) =>
            {
                let data_type = if self.check(&Token::Date) {
                    DataType::Date
                } else {
                    DataType::Timestamp
                };
                self.advance();
                let literal = self.parse_primary_expr()?;
                Ok(Expr::Cast {
                    expr: Box::new(literal),
                    data_type,
                })
            }

            // Aggregate functions
            Token::Count | Token::Sum | Token::Avg | Token::Min | Token::Max
                if self.peek() == Some(&Token::LParen) =>
            {
                self.parse_function()
            }

            // Identifier (column or function)
            Token::Identifier(name) => {
                if self.peek() == Some(&Token::LParen) {
                    if name == "cast" {
                        return self.parse_cast();
                    }
                    return self.parse_function();
                }
                self.advance();
                if matches!(name.as_str(), "current_date" | "current_timestamp")
                    && !self.check(&Token::Dot)
                {
                    return Ok(Expr::Function {
                        name: name.to_uppercase(),
                        args: Vec::new(),
                        distinct: false,
                    });
                }
                self.parse_column_tail(name)
            }

            token => match token.non_reserved_name() {
                Some(name) => {
                    self.advance();
                    self.parse_column_tail(name.to_string())
                }
                None => Err(Error::UnexpectedToken {
                    expected: "expression".to_string(),
                    found: format!("{}", self.current()),
                }),
            },
        }
    }

    /// Qualified column (table.column) or a bare column name
    fn parse_column_tail(&mut self, name: String) -> Result<Expr> {
        if self.check(&Token::Dot) {
            self.advance();
            let column = self.expect_identifier()?;
            Ok(Expr::Column(ColumnRef {
                table: Some(name),
                column,
            }))
        } else {
            Ok(Expr::Column(ColumnRef {
                table: None,
                column: name,
            }))
        }
    }

    fn parse_cast(&mut self) -> Result<Expr> {
        self.expect_keyword("cast")?;
        self.expect(&Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&Token::As)?;
        let data_type = self.parse_data_type()?;
        self.expect(&Token::RParen)?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }

    fn parse_function(&mut self) -> Result<Expr> {
        let name = match self.current().clone() {
            Token::Count => "COUNT".to_string(),
            Token::Sum => "SUM".to_string(),
            Token::Avg => "AVG".to_string(),
            Token::Min => "MIN".to_string(),
            Token::Max => "MAX".to_string(),
            Token::Identifier(n) => n.to_uppercase(),
            _ => {
                return Err(Error::UnexpectedToken {
                    expected: "function name".to_string(),
                    found: format!("{}", self.current()),
                })
            }
        };
        self.advance();

        self.expect(&Token::LParen)?;

        let distinct = if self.check(&Token::Distinct) {
            self.advance();
            true
        } else {
            false
        };

        let args = if self.check(&Token::Asterisk) {
            self.advance();
            vec![Expr::Wildcard]
        } else if self.check(&Token::RParen) {
            vec![]
        } else {
            self.parse_expr_list()?
        };

        self.expect(&Token::RParen)?;

        if self.consume_keyword("over") {
            if distinct {
                return Err(Error::ParseError(
                    "DISTINCT is not supported in window functions".to_string(),
                ));
            }
            let spec = self.parse_window_spec()?;
            return Ok(Expr::WindowFunction { name, args, spec });
        }

        Ok(Expr::Function {
            name,
            args,
            distinct,
        })
    }

    fn parse_window_spec(&mut self) -> Result<WindowSpec> {
        self.expect(&Token::LParen)?;
        let mut spec = WindowSpec::default();

        if self.consume_keyword("partition") {
            self.expect(&Token::By)?;
            spec.partition_by = self.parse_expr_list()?;
        }

        if self.check(&Token::Order) {
            self.advance();
            self.expect(&Token::By)?;
            spec.order_by = self.parse_order_by_list()?;
        }

        if self.consume_keyword("rows") {
            let frame = if self.check(&Token::Between) {
                self.advance();
                let start = self.parse_frame_bound()?;
                self.expect(&Token::And)?;
                let end = self.parse_frame_bound()?;
                WindowFrame { start, end }
            } else {
                WindowFrame {
                    start: self.parse_frame_bound()?,
                    end: FrameBound::CurrentRow,
                }
            };
            if matches!(frame.start, FrameBound::UnboundedFollowing)
                || matches!(frame.end, FrameBound::UnboundedPreceding)
            {
                return Err(Error::ParseError("invalid window frame bounds".to_string()));
            }
            spec.frame = Some(frame);
        } else if self.check_keyword("range") {
            return Err(Error::ParseError(
                "RANGE window frames are not supported; use ROWS".to_string(),
            ));
        }

        self.expect(&Token::RParen)?;
        Ok(spec)
    }

    fn parse_frame_bound(&mut self) -> Result<FrameBound> {
        if self.consume_keyword("unbounded") {
            if self.consume_keyword("preceding") {
                return Ok(FrameBound::UnboundedPreceding);
            }
            self.expect_keyword("following")?;
            return Ok(FrameBound::UnboundedFollowing);
        }
        if self.consume_keyword("current") {
            self.expect_keyword("row")?;
            return Ok(FrameBound::CurrentRow);
        }
        let n = self.expect_integer()?;
        if n < 0 {
            return Err(Error::ParseError(
                "frame offset must not be negative".to_string(),
            ));
        }
        if self.consume_keyword("preceding") {
            Ok(FrameBound::Preceding(n as u64))
        } else {
            self.expect_keyword("following")?;
            Ok(FrameBound::Following(n as u64))
        }
    }

    fn parse_case_expr(&mut self) -> Result<Expr> {
        self.expect(&Token::Case)?;

        // Check for simple CASE (CASE expr WHEN ...)
        let operand = if !self.check(&Token::When) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        let mut when_clauses = Vec::new();
        while self.check(&Token::When) {
            self.advance();
            let when_expr = self.parse_expr()?;
            self.expect(&Token::Then)?;
            let then_expr = self.parse_expr()?;
            when_clauses.push((when_expr, then_expr));
        }

        if when_clauses.is_empty() {
            return Err(Error::UnexpectedToken {
                expected: "WHEN".to_string(),
                found: format!("{}", self.current()),
            });
        }

        let else_clause = if self.check(&Token::Else) {
            self.advance();
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        self.expect(&Token::End)?;

        Ok(Expr::Case {
            operand,
            when_clauses,
            else_clause,
        })
    }

    // ========== Helper functions ==========

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expr()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(exprs)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        let mut identifiers = Vec::new();

        loop {
            identifiers.push(self.expect_identifier()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(identifiers)
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_nth(1)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(Error::UnexpectedEof(format!("{}", token)))
        } else {
            Err(Error::UnexpectedToken {
                expected: format!("{}", token),
                found: format!("{}", self.current()),
            })
        }
    }

    /// Whether the current token is the unreserved word `keyword`
    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(self.current(), Token::Identifier(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn peek_is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Identifier(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(Error::UnexpectedToken {
                expected: keyword.to_uppercase(),
                found: format!("{}", self.current()),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        let name = match self.current() {
            Token::Identifier(name) => name.clone(),
            token => match token.non_reserved_name() {
                Some(name) => name.to_string(),
                None => {
                    return Err(Error::UnexpectedToken {
                        expected: "identifier".to_string(),
                        found: format!("{}", self.current()),
                    })
                }
            },
        };
        self.advance();
        Ok(name)
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match self.current().clone() {
            Token::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "integer".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    // ========== Transaction Statements ==========

    fn parse_begin(&mut self) -> Result<Statement> {
        if self.check(&Token::Begin) {
            self.advance();
            if self.check(&Token::Transaction) || self.check_keyword("work") {
                self.advance();
            }
        } else {
            self.expect_keyword("start")?;
            self.expect(&Token::Transaction)?;
        }

        let level = if self.consume_keyword("isolation") {
            self.expect_keyword("level")?;
            Some(self.parse_isolation_level()?)
        } else {
            None
        };
        Ok(Statement::BeginTransaction(level))
    }

    fn parse_commit(&mut self) -> Result<Statement> {
        self.expect(&Token::Commit)?;
        if self.check(&Token::Transaction) || self.check_keyword("work") {
            self.advance();
        }
        Ok(Statement::Commit)
    }

    fn parse_rollback(&mut self) -> Result<Statement> {
        self.expect(&Token::Rollback)?;
        if self.check(&Token::Transaction) || self.check_keyword("work") {
            self.advance();
        }
        Ok(Statement::Rollback)
    }

    /// `SET TRANSACTION ISOLATION LEVEL x` or
    /// `SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL x`
    fn parse_set(&mut self) -> Result<Statement> {
        self.expect(&Token::Set)?;
        let session = if self.consume_keyword("session") {
            self.expect_keyword("characteristics")?;
            self.expect(&Token::As)?;
            true
        } else {
            false
        };
        self.expect(&Token::Transaction)?;
        self.expect_keyword("isolation")?;
        self.expect_keyword("level")?;
        let level = self.parse_isolation_level()?;
        Ok(Statement::SetIsolationLevel { level, session })
    }

    fn parse_isolation_level(&mut self) -> Result<IsolationLevel> {
        if self.consume_keyword("serializable") {
            return Ok(IsolationLevel::Serializable);
        }
        if self.consume_keyword("repeatable") {
            self.expect_keyword("read")?;
            return Ok(IsolationLevel::RepeatableRead);
        }
        self.expect_keyword("read")?;
        if self.consume_keyword("committed") {
            Ok(IsolationLevel::ReadCommitted)
        } else {
            self.expect_keyword("uncommitted")?;
            Ok(IsolationLevel::ReadUncommitted)
        }
    }
}

/// Parse a SQL string into its statements
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    Parser::new(sql)?.parse_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(sql: &str) -> Statement {
        Parser::new(sql).unwrap().parse().unwrap()
    }

    fn parse_select_body(sql: &str) -> (Query, SelectStatement) {
        match parse_one(sql) {
            Statement::Query(q) => {
                let select = match &q.body {
                    SetExpr::Select(s) => (**s).clone(),
                    other => panic!("Expected plain SELECT, got {:?}", other),
                };
                (*q, select)
            }
            other => panic!("Expected query, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let (_, s) = parse_select_body("SELECT * FROM users");
        assert_eq!(s.columns.len(), 1);
        assert!(matches!(s.columns[0], SelectItem::Wildcard));
        assert!(s.from.is_some());
    }

    #[test]
    fn test_parse_select_with_where_order_limit() {
        let (q, s) = parse_select_body(
            "SELECT id, name FROM users WHERE id = 1 ORDER BY name DESC NULLS LAST LIMIT 5 OFFSET 10",
        );
        assert_eq!(s.columns.len(), 2);
        assert!(s.where_clause.is_some());
        assert_eq!(q.order_by.len(), 1);
        assert!(!q.order_by[0].ascending);
        assert_eq!(q.order_by[0].nulls_first, Some(false));
        assert_eq!(q.limit, Some(Expr::Literal(Literal::Integer(5))));
        assert_eq!(q.offset, Some(Expr::Literal(Literal::Integer(10))));
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = parse_one(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name VARCHAR(100) NOT NULL,
                email VARCHAR(255) UNIQUE,
                age INTEGER DEFAULT -1 CHECK (age >= -1),
                price DECIMAL(10, 2)
            )",
        );

        match stmt {
            Statement::CreateTable(ct) => {
                assert_eq!(ct.table_name, "users");
                assert_eq!(ct.columns.len(), 5);
                assert!(ct.columns[0].primary_key);
                assert!(ct.columns[1].not_null);
                assert!(ct.columns[2].unique);
                assert!(ct.columns[3].default.is_some());
                assert!(ct.columns[3].check.is_some());
                assert_eq!(ct.columns[4].data_type, DataType::Decimal(10, 2));
            }
            _ => panic!("Expected CREATE TABLE statement"),
        }
    }

    #[test]
    fn test_parse_foreign_key_actions() {
        let stmt = parse_one(
            "CREATE TABLE books (
                id SERIAL PRIMARY KEY,
                author_id INT,
                CONSTRAINT fk_author FOREIGN KEY (author_id) REFERENCES authors (id)
                    ON DELETE CASCADE ON UPDATE SET NULL DEFERRABLE INITIALLY DEFERRED
            )",
        );

        match stmt {
            Statement::CreateTable(ct) => {
                assert!(ct.columns[0].auto_increment);
                match &ct.constraints[0] {
                    TableConstraint::ForeignKey {
                        name,
                        columns,
                        clause,
                    } => {
                        assert_eq!(name.as_deref(), Some("fk_author"));
                        assert_eq!(columns, &vec!["author_id".to_string()]);
                        assert_eq!(clause.on_delete, ReferentialAction::Cascade);
                        assert_eq!(clause.on_update, ReferentialAction::SetNull);
                        assert!(clause.deferred);
                    }
                    other => panic!("Expected FOREIGN KEY, got {:?}", other),
                }
            }
            _ => panic!("Expected CREATE TABLE statement"),
        }
    }

    #[test]
    fn test_parse_insert() {
        let stmt = parse_one("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob')");

        match stmt {
            Statement::Insert(i) => {
                assert_eq!(i.table_name, "users");
                assert_eq!(i.columns.as_ref().unwrap().len(), 2);
                match i.source {
                    InsertSource::Values(rows) => assert_eq!(rows.len(), 2),
                    _ => panic!("Expected VALUES"),
                }
            }
            _ => panic!("Expected INSERT statement"),
        }
    }

    #[test]
    fn test_parse_insert_select() {
        let stmt = parse_one("INSERT INTO archive SELECT * FROM users WHERE id > 10");
        match stmt {
            Statement::Insert(i) => assert!(matches!(i.source, InsertSource::Query(_))),
            _ => panic!("Expected INSERT statement"),
        }
    }

    #[test]
    fn test_parse_update() {
        let stmt = parse_one("UPDATE users SET name = 'Charlie', age = 30 WHERE id = 1");

        match stmt {
            Statement::Update(u) => {
                assert_eq!(u.table_name, "users");
                assert_eq!(u.assignments.len(), 2);
                assert!(u.where_clause.is_some());
            }
            _ => panic!("Expected UPDATE statement"),
        }
    }

    #[test]
    fn test_parse_delete() {
        let stmt = parse_one("DELETE FROM users WHERE id = 1");

        match stmt {
            Statement::Delete(d) => {
                assert_eq!(d.table_name, "users");
                assert!(d.where_clause.is_some());
            }
            _ => panic!("Expected DELETE statement"),
        }
    }

    #[test]
    fn test_parse_join() {
        let (_, s) = parse_select_body(
            "SELECT u.name, o.total FROM users u LEFT JOIN orders o ON u.id = o.user_id, regions",
        );
        let from = s.from.unwrap();
        assert_eq!(from.table.binding_name(), "u");
        assert_eq!(from.joins.len(), 2);
        assert_eq!(from.joins[0].join_type, JoinType::Left);
        assert_eq!(from.joins[1].join_type, JoinType::Cross);
    }

    #[test]
    fn test_join_without_condition_is_rejected() {
        assert!(Parser::new("SELECT * FROM a JOIN b").unwrap().parse().is_err());
    }

    #[test]
    fn test_parse_window_function() {
        let (_, s) = parse_select_body(
            "SELECT name, RANK() OVER (PARTITION BY dept ORDER BY salary DESC) AS r FROM emp",
        );
        match &s.columns[1] {
            SelectItem::Expr {
                expr: Expr::WindowFunction { name, spec, .. },
                alias,
            } => {
                assert_eq!(name, "RANK");
                assert_eq!(spec.partition_by.len(), 1);
                assert_eq!(spec.order_by.len(), 1);
                assert!(spec.frame.is_none());
                assert_eq!(alias.as_deref(), Some("r"));
            }
            other => panic!("Expected window function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_window_frame() {
        let (_, s) = parse_select_body(
            "SELECT SUM(x) OVER (ORDER BY t ROWS BETWEEN 2 PRECEDING AND CURRENT ROW) FROM m",
        );
        match &s.columns[0] {
            SelectItem::Expr {
                expr: Expr::WindowFunction { spec, .. },
                ..
            } => {
                assert_eq!(
                    spec.frame,
                    Some(WindowFrame {
                        start: FrameBound::Preceding(2),
                        end: FrameBound::CurrentRow,
                    })
                );
            }
            other => panic!("Expected window function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_recursive_cte_and_union() {
        let stmt = parse_one(
            "WITH RECURSIVE nums(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums WHERE n < 5)
             SELECT n FROM nums",
        );
        match stmt {
            Statement::Query(q) => {
                let with = q.with.unwrap();
                assert!(with.recursive);
                assert_eq!(with.ctes[0].name, "nums");
                assert_eq!(with.ctes[0].columns, vec!["n".to_string()]);
                assert!(matches!(
                    with.ctes[0].query.body,
                    SetExpr::SetOperation {
                        op: SetOperator::Union,
                        all: true,
                        ..
                    }
                ));
            }
            _ => panic!("Expected query"),
        }
    }

    #[test]
    fn test_intersect_binds_tighter_than_union() {
        let stmt = parse_one("SELECT 1 UNION SELECT 2 INTERSECT SELECT 3");
        match stmt {
            Statement::Query(q) => match q.body {
                SetExpr::SetOperation { op, right, .. } => {
                    assert_eq!(op, SetOperator::Union);
                    assert!(matches!(
                        *right,
                        SetExpr::SetOperation {
                            op: SetOperator::Intersect,
                            ..
                        }
                    ));
                }
                _ => panic!("Expected set operation"),
            },
            _ => panic!("Expected query"),
        }
    }

    #[test]
    fn test_parse_subqueries() {
        let (_, s) = parse_select_body(
            "SELECT * FROM t WHERE a IN (SELECT b FROM u) AND c > ALL (SELECT d FROM v)
             AND NOT EXISTS (SELECT 1 FROM w) AND e NOT IN (1, 2)",
        );
        let mut kinds = Vec::new();
        s.where_clause.unwrap().walk(&mut |e| match e {
            Expr::InSubquery { .. } => kinds.push("in"),
            Expr::Quantified {
                quantifier: Quantifier::All,
                ..
            } => kinds.push("all"),
            Expr::Exists(_) => kinds.push("exists"),
            Expr::InList { negated: true, .. } => kinds.push("not-in"),
            _ => {}
        });
        assert_eq!(kinds, vec!["in", "all", "exists", "not-in"]);
    }

    #[test]
    fn test_parse_parameters() {
        let (_, s) = parse_select_body("SELECT * FROM t WHERE a = ? AND b = ? AND c = $1");
        let mut params = Vec::new();
        s.where_clause.unwrap().walk(&mut |e| {
            if let Expr::Parameter(n) = e {
                params.push(*n);
            }
        });
        assert_eq!(params, vec![1, 2, 1]);
    }

    #[test]
    fn test_non_reserved_keywords_as_names() {
        let (_, s) = parse_select_body("SELECT date, count FROM events WHERE key = 1");
        match &s.columns[0] {
            SelectItem::Expr { expr, .. } => assert_eq!(expr, &Expr::column("date")),
            _ => panic!("Expected column"),
        }
    }

    #[test]
    fn test_negative_integer_bounds() {
        let (_, s) = parse_select_body("SELECT -9223372036854775808, -5, -9223372036854775809");
        let exprs: Vec<&Expr> = s
            .columns
            .iter()
            .map(|item| match item {
                SelectItem::Expr { expr, .. } => expr,
                other => panic!("Expected expression, got {:?}", other),
            })
            .collect();
        assert_eq!(exprs[0], &Expr::Literal(Literal::Integer(i64::MIN)));
        assert!(matches!(exprs[1], Expr::UnaryOp { op: UnaryOperator::Minus, .. }));
        assert!(matches!(exprs[2], Expr::UnaryOp { op: UnaryOperator::Minus, .. }));
    }

    #[test]
    fn test_typed_literal_and_cast() {
        let (_, s) = parse_select_body("SELECT DATE '2024-01-31', CAST(price AS INT) FROM t");
        assert!(matches!(
            &s.columns[0],
            SelectItem::Expr {
                expr: Expr::Cast {
                    data_type: DataType::Date,
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            &s.columns[1],
            SelectItem::Expr {
                expr: Expr::Cast {
                    data_type: DataType::Integer,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_parse_alter_table() {
        match parse_one("ALTER TABLE t ADD COLUMN c INT NOT NULL DEFAULT 0") {
            Statement::AlterTable(a) => {
                assert!(matches!(a.action, AlterTableAction::AddColumn(ref c) if c.not_null))
            }
            _ => panic!("Expected ALTER TABLE"),
        }
        match parse_one("ALTER TABLE t ALTER COLUMN c TYPE SMALLINT") {
            Statement::AlterTable(a) => assert_eq!(
                a.action,
                AlterTableAction::AlterColumnType {
                    name: "c".into(),
                    data_type: DataType::SmallInt
                }
            ),
            _ => panic!("Expected ALTER TABLE"),
        }
        match parse_one("ALTER TABLE t DROP COLUMN c") {
            Statement::AlterTable(a) => assert_eq!(
                a.action,
                AlterTableAction::DropColumn {
                    name: "c".into(),
                    if_exists: false
                }
            ),
            _ => panic!("Expected ALTER TABLE"),
        }
    }

    #[test]
    fn test_parse_transaction_control() {
        assert_eq!(
            parse_one("BEGIN ISOLATION LEVEL SERIALIZABLE"),
            Statement::BeginTransaction(Some(IsolationLevel::Serializable))
        );
        assert_eq!(
            parse_one("START TRANSACTION"),
            Statement::BeginTransaction(None)
        );
        assert_eq!(
            parse_one("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"),
            Statement::SetIsolationLevel {
                level: IsolationLevel::RepeatableRead,
                session: false
            }
        );
        assert_eq!(
            parse_one("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"),
            Statement::SetIsolationLevel {
                level: IsolationLevel::ReadUncommitted,
                session: true
            }
        );
        assert_eq!(parse_one("COMMIT"), Statement::Commit);
        assert_eq!(parse_one("ROLLBACK WORK"), Statement::Rollback);
    }

    #[test]
    fn test_parse_views_and_drops() {
        assert!(matches!(
            parse_one("CREATE MATERIALIZED VIEW mv AS SELECT a FROM t"),
            Statement::CreateView(CreateViewStatement {
                materialized: true,
                ..
            })
        ));
        assert!(matches!(
            parse_one("DROP TABLE authors CASCADE"),
            Statement::DropTable(DropTableStatement { cascade: true, .. })
        ));
        assert_eq!(
            parse_one("REFRESH MATERIALIZED VIEW mv"),
            Statement::RefreshMaterializedView("mv".into())
        );
    }

    #[test]
    fn test_parse_all_statements() {
        let stmts = parse_sql("BEGIN; INSERT INTO t VALUES (1);; COMMIT;").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_trailing_garbage_is_an_error() {
        assert!(Parser::new("SELECT 1 2").unwrap().parse().is_err());
    }
}
