//! Legality checker for type descriptions
//!
//! Walks the statement lists of a type and reports statements used where
//! their context forbids them. The checker never changes the library; it
//! only reports through the [`Reporter`] and returns the last rule that
//! fired, so callers decide whether to instantiate anyway.

use std::fmt;

use ascend_core::{
    BaseKind, Diagnostic, DiagnosticCode, DiagnosticLocation, DiagnosticSink, ExtMode, FlowKind,
    ForKind, Name, Reporter, Section, Severity, Statement, StatementKind, TypeDescription,
    TypeLibrary,
};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LintCode {
    Okay,
    AreAlikeStyle,
    ArgNumIncorrect,
    ArgDefIncorrect,
    NameIncorrect,
    ArrIncorrect,
    TooManyRelop,
    TooManyLogop,
    ForNotBody,
    ForNotCheck,
    ForNotMethod,
    IllegalSelect,
    IllegalParam,
    IllegalValueParam,
    MultiParam,
    BodyAssign,
    StatementMislocated,
    UseNotWhen,
    IllegalBreak,
    IllegalContinue,
    IllegalFallThrough,
    UnknownType,
    DuplicateMethod,
    SelfContaining,
}

impl LintCode {
    pub fn name(self) -> &'static str {
        match self {
            LintCode::Okay => "OKAY",
            LintCode::AreAlikeStyle => "STAT_ARE_ALIKE",
            LintCode::ArgNumIncorrect => "ARGNUM_INCORRECT",
            LintCode::ArgDefIncorrect => "ARGDEF_INCORRECT",
            LintCode::NameIncorrect => "NAME_INCORRECT",
            LintCode::ArrIncorrect => "ARR_INCORRECT",
            LintCode::TooManyRelop => "TOOMANY_RELOP",
            LintCode::TooManyLogop => "TOOMANY_LOGOP",
            LintCode::ForNotBody => "FOR_NOTBODY",
            LintCode::ForNotCheck => "FOR_NOTCHECK",
            LintCode::ForNotMethod => "FOR_NOTMETH",
            LintCode::IllegalSelect => "ILLEGAL_SELECT",
            LintCode::IllegalParam => "ILLEGAL_PARAM",
            LintCode::IllegalValueParam => "ILLEGAL_VALPAR",
            LintCode::MultiParam => "MULTI_PARAM",
            LintCode::BodyAssign => "STAT_BODYASGN",
            LintCode::StatementMislocated => "STAT_MISLOCATED",
            LintCode::UseNotWhen => "USE_NOTWHEN",
            LintCode::IllegalBreak => "ILLEGAL_BREAK",
            LintCode::IllegalContinue => "ILLEGAL_CONTINUE",
            LintCode::IllegalFallThrough => "ILLEGAL_FALLTHRU",
            LintCode::UnknownType => "UNKNOWN_TYPE",
            LintCode::DuplicateMethod => "DUPLICATE_METHOD",
            LintCode::SelfContaining => "SELF_CONTAINING",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            LintCode::Okay | LintCode::AreAlikeStyle | LintCode::BodyAssign => Severity::Note,
            LintCode::DuplicateMethod => Severity::Warning,
            LintCode::SelfContaining => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Style notes count as okay.
    pub fn is_okay(self) -> bool {
        self.severity() == Severity::Note
    }
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Enclosing compound statements of the list being checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LintContext(u8);

impl LintContext {
    pub const NONE: LintContext = LintContext(0);
    pub const FOR: LintContext = LintContext(1);
    pub const WHEN: LintContext = LintContext(1 << 1);
    pub const SELECT: LintContext = LintContext(1 << 2);
    pub const COND: LintContext = LintContext(1 << 3);
    pub const SWITCH: LintContext = LintContext(1 << 4);
    pub const WHILE: LintContext = LintContext(1 << 5);
    pub const IF: LintContext = LintContext(1 << 6);

    pub fn with(self, other: LintContext) -> LintContext {
        LintContext(self.0 | other.0)
    }

    /// True when any flag of `other` is set.
    pub fn intersects(self, other: LintContext) -> bool {
        self.0 & other.0 != 0
    }
}

pub struct Linter<'a> {
    library: &'a TypeLibrary,
    reporter: &'a mut Reporter,
}

impl<'a> Linter<'a> {
    pub fn new(library: &'a TypeLibrary, reporter: &'a mut Reporter) -> Self {
        Self { library, reporter }
    }

    fn fire(
        &mut self,
        type_name: &str,
        stmt: Option<&Statement>,
        code: LintCode,
        message: impl Into<String>,
    ) -> LintCode {
        let mut location = DiagnosticLocation::new().in_type(type_name);
        if let Some(s) = stmt {
            location = location.at_statement(s);
        }
        let diagnostic =
            Diagnostic::new(code.severity(), DiagnosticCode::Lint(code.name()), message);
        self.reporter.report(diagnostic.at(location));
        code
    }

    fn banner(&mut self, type_name: &str, section: &str) {
        self.reporter.report(
            Diagnostic::note(
                DiagnosticCode::Lint("SUMMARY"),
                format!("Errors detected in {} of '{}'", section, type_name),
            )
            .at(DiagnosticLocation::new().in_type(type_name)),
        );
    }

    /// Check every section of `desc`. Returns the last rule that fired.
    pub fn check_type(&mut self, desc: &TypeDescription) -> LintCode {
        debug!("Linting '{}'", desc.name);
        let mut rval = LintCode::Okay;
        for code in [
            self.check_parameters(&desc.name, &desc.parameters),
            self.check_where(&desc.name, &desc.where_clauses),
            self.check_reductions(&desc.name, &desc.reductions),
            self.check_body(&desc.name, &desc.body, LintContext::NONE, 0),
            self.check_methods(desc),
        ] {
            if !code.is_okay() {
                rval = code;
            }
        }
        if self
            .library
            .detect_cycles()
            .iter()
            .any(|cycle| cycle.iter().any(|n| *n == desc.name))
        {
            rval = self.fire(
                &desc.name,
                None,
                LintCode::SelfContaining,
                format!("'{}' contains itself through its parts", desc.name),
            );
        }
        rval
    }

    /// Check every type of the library in dependency order. Returns the
    /// types with at least one rule firing.
    pub fn check_library(&mut self) -> Vec<(String, LintCode)> {
        let order: Vec<String> = match self.library.dependency_order() {
            Ok(order) => order,
            Err(_) => self.library.iter().map(|d| d.name.clone()).collect(),
        };
        let mut findings = Vec::new();
        for name in order {
            let Some(desc) = self.library.find(&name) else { continue };
            let code = self.check_type(&desc);
            if !code.is_okay() {
                findings.push((name, code));
            }
        }
        findings
    }

    /// Declarative body statements. `depth` counts the nested lists above
    /// this one; the summary banner is only emitted at depth 0.
    pub fn check_body(
        &mut self,
        type_name: &str,
        stmts: &[Statement],
        context: LintContext,
        depth: usize,
    ) -> LintCode {
        let mut rval = LintCode::Okay;
        for stmt in stmts {
            let code = self.check_body_statement(type_name, stmt, context, depth);
            if !code.is_okay() {
                rval = code;
            }
        }
        if !rval.is_okay() && depth == 0 {
            self.banner(type_name, "declarative section");
        }
        rval
    }

    fn check_body_statement(
        &mut self,
        type_name: &str,
        stmt: &Statement,
        context: LintContext,
        depth: usize,
    ) -> LintCode {
        match &stmt.kind {
            StatementKind::IsA { names, type_name: t, args, .. } => {
                if let Some(code) = self.check_arity(type_name, stmt, t, args.len()) {
                    return code;
                }
                self.check_simple_names(
                    type_name,
                    stmt,
                    names,
                    "Cannot create parts in another object with IS_A",
                )
            }
            StatementKind::Aliases { names, .. } => self.check_simple_names(
                type_name,
                stmt,
                names,
                "Cannot create parts in another object with ALIASES",
            ),
            StatementKind::AliasArray { array, set_name, .. } => {
                let mut rval = LintCode::Okay;
                if array.is_compound() {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::NameIncorrect,
                        "Cannot create parts in another object with ALIASES",
                    );
                }
                let matches_set = array
                    .last_subscript()
                    .and_then(|items| match items.as_slice() {
                        [ascend_core::SetItem::Single(ascend_core::Expr::Name(n))] => n.simple_id(),
                        _ => None,
                    })
                    == Some(set_name.as_str());
                if !matches_set {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::ArrIncorrect,
                        format!(
                            "Name of set '{}' must match the last subscript of '{}'",
                            set_name, array
                        ),
                    );
                }
                rval
            }
            StatementKind::Relation { name, expr } => {
                let mut rval = LintCode::Okay;
                if name.as_ref().is_some_and(Name::is_compound) {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::NameIncorrect,
                        "Cannot create relations in another object",
                    );
                }
                if expr.relop_count() > 1 {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::TooManyRelop,
                        format!("Relation has {} relational operators", expr.relop_count()),
                    );
                }
                rval
            }
            StatementKind::LogRelation { name, expr } => {
                let mut rval = LintCode::Okay;
                if name.as_ref().is_some_and(Name::is_compound) {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::NameIncorrect,
                        "Cannot create logical relations in another object",
                    );
                }
                if expr.relop_count() > 1 {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::TooManyLogop,
                        format!("Logical relation has {} relational operators", expr.relop_count()),
                    );
                }
                rval
            }
            StatementKind::IsRefinedTo { type_name: t, args, .. } => {
                self.check_arity(type_name, stmt, t, args.len()).unwrap_or(LintCode::Okay)
            }
            StatementKind::AreTheSame { .. } | StatementKind::ConstAssign { .. } => LintCode::Okay,
            StatementKind::AreAlike { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::AreAlikeStyle,
                format!("Type '{}' contains ARE_ALIKE; consider parameters instead", type_name),
            ),
            StatementKind::For { kind, body, .. } => {
                let mut rval = LintCode::Okay;
                if contains_select(body) {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::IllegalSelect,
                        "SELECT is not allowed inside FOR",
                    );
                }
                if *kind != ForKind::Create {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::ForNotBody,
                        format!("FOR/{:?} is not allowed in a declarative body", kind),
                    );
                } else {
                    let code = self.check_body(
                        type_name,
                        body,
                        context.with(LintContext::FOR),
                        depth + 1,
                    );
                    if !code.is_okay() {
                        rval = code;
                    }
                }
                rval
            }
            StatementKind::Assign { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::BodyAssign,
                "Default assignment in a declarative body; move it to METHOD default_self",
            ),
            StatementKind::Use { .. } => {
                if context.intersects(LintContext::WHEN) {
                    LintCode::Okay
                } else if context.intersects(LintContext::SELECT) {
                    self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::UseNotWhen,
                        "USE outside WHEN; perhaps the surrounding SELECT should be WHEN?",
                    )
                } else {
                    self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::UseNotWhen,
                        "USE is only allowed inside WHEN",
                    )
                }
            }
            StatementKind::When { name, cases, .. } => {
                let mut rval = LintCode::Okay;
                if name.as_ref().is_some_and(Name::is_compound) {
                    rval = self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::NameIncorrect,
                        "Cannot create whens in another object",
                    );
                }
                for case in cases {
                    let code = self.check_body(
                        type_name,
                        &case.body,
                        context.with(LintContext::WHEN),
                        depth + 1,
                    );
                    if !code.is_okay() {
                        rval = code;
                    }
                }
                rval
            }
            StatementKind::Select { cases, .. } => {
                let mut rval = LintCode::Okay;
                for case in cases {
                    let code = self.check_body(
                        type_name,
                        &case.body,
                        context.with(LintContext::SELECT),
                        depth + 1,
                    );
                    if !code.is_okay() {
                        rval = code;
                    }
                }
                rval
            }
            StatementKind::Conditional { body } => {
                self.check_body(type_name, body, context.with(LintContext::COND), depth + 1)
            }
            StatementKind::External { mode, .. } => match mode {
                ExtMode::Blackbox => LintCode::Okay,
                ExtMode::Method => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    "EXTERNAL method calls are not allowed in a declarative body",
                ),
            },
            StatementKind::Switch { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::StatementMislocated,
                "SWITCH is not allowed in a declarative body; \
                 perhaps SWITCH should be WHEN or SELECT?",
            ),
            StatementKind::Flow { .. } | StatementKind::While { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::StatementMislocated,
                "Flow controls are allowed only in methods",
            ),
            StatementKind::If { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::StatementMislocated,
                "IF is not allowed in a declarative body; perhaps IF should be WHEN or SELECT?",
            ),
            StatementKind::Run { .. }
            | StatementKind::Call { .. }
            | StatementKind::WillBe { .. }
            | StatementKind::WillBeTheSame { .. }
            | StatementKind::WillNotBeTheSame { .. }
            | StatementKind::Fix { .. }
            | StatementKind::Free { .. }
            | StatementKind::Assert { .. } => self.fire(
                type_name,
                Some(stmt),
                LintCode::StatementMislocated,
                format!("{} is not allowed in a declarative body", stmt.keyword()),
            ),
        }
    }

    /// Parameter list: only IS_A of constants or sets and WILL_BE, one
    /// simple name per statement.
    pub fn check_parameters(&mut self, type_name: &str, stmts: &[Statement]) -> LintCode {
        let mut rval = LintCode::Okay;
        for stmt in stmts {
            let code = match &stmt.kind {
                StatementKind::WillBe { names, type_name: t, args, .. } => {
                    match self.library.find(t).map(|d| d.kind) {
                        Some(BaseKind::Relation | BaseKind::LogRelation | BaseKind::When) => {
                            self.fire(
                                type_name,
                                Some(stmt),
                                LintCode::IllegalParam,
                                format!("'{}' cannot be passed as a parameter", t),
                            )
                        }
                        Some(BaseKind::Model) if !args.is_empty() => self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::ArgDefIncorrect,
                            format!(
                                "Arguments defined with WILL_BE cannot have arguments. Got {}; \
                                 you may want WILL_BE_THE_SAME instead",
                                args.len()
                            ),
                        ),
                        None => self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::UnknownType,
                            format!("Type '{}' not found", t),
                        ),
                        _ if names.len() > 1 => self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::MultiParam,
                            "Parameters must be declared one name per statement",
                        ),
                        _ => self.check_simple_names(
                            type_name,
                            stmt,
                            names,
                            "Cannot use . in defining MODEL arguments",
                        ),
                    }
                }
                StatementKind::IsA { names, type_name: t, .. } => {
                    let kind = self.library.find(t).map(|d| d.kind);
                    if !matches!(kind, Some(BaseKind::Set | BaseKind::Constant)) {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::IllegalValueParam,
                            format!("IS_A parameter of type '{}' must be a constant or a set", t),
                        )
                    } else if names.len() > 1 {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::MultiParam,
                            "Parameters must be declared one name per statement",
                        )
                    } else {
                        self.check_simple_names(
                            type_name,
                            stmt,
                            names,
                            "Cannot create parts in another object with IS_A",
                        )
                    }
                }
                _ => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    format!("{} is not allowed in a parameter list", stmt.keyword()),
                ),
            };
            if !code.is_okay() {
                rval = code;
            }
        }
        if !rval.is_okay() {
            self.banner(type_name, "argument definitions");
        }
        rval
    }

    pub fn check_where(&mut self, type_name: &str, stmts: &[Statement]) -> LintCode {
        let rval = self.check_where_list(type_name, stmts);
        if !rval.is_okay() {
            self.banner(type_name, "WHERE statements");
        }
        rval
    }

    fn check_where_list(&mut self, type_name: &str, stmts: &[Statement]) -> LintCode {
        let mut rval = LintCode::Okay;
        for stmt in stmts {
            let code = match &stmt.kind {
                StatementKind::For { kind, body, .. } => {
                    if *kind == ForKind::Check {
                        self.check_where_list(type_name, body)
                    } else {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::ForNotCheck,
                            format!("FOR/{:?} is not allowed in WHERE; use FOR/CHECK", kind),
                        )
                    }
                }
                StatementKind::WillBeTheSame { .. }
                | StatementKind::WillNotBeTheSame { .. }
                | StatementKind::Relation { .. }
                | StatementKind::LogRelation { .. } => LintCode::Okay,
                _ => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    format!("{} is not allowed in a WHERE clause", stmt.keyword()),
                ),
            };
            if !code.is_okay() {
                rval = code;
            }
        }
        rval
    }

    pub fn check_reductions(&mut self, type_name: &str, stmts: &[Statement]) -> LintCode {
        let mut rval = LintCode::Okay;
        for stmt in stmts {
            let code = match &stmt.kind {
                StatementKind::ConstAssign { target, .. } if target.is_compound() => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::NameIncorrect,
                    "Cannot assign parts in an object being passed in",
                ),
                StatementKind::ConstAssign { .. } => LintCode::Okay,
                _ => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    format!("{} is not allowed in parameter assignments", stmt.keyword()),
                ),
            };
            if !code.is_okay() {
                rval = code;
            }
        }
        if !rval.is_okay() {
            self.banner(type_name, "parameter assignments");
        }
        rval
    }

    pub fn check_methods(&mut self, desc: &TypeDescription) -> LintCode {
        let mut rval = LintCode::Okay;
        for (i, method) in desc.methods.iter().enumerate() {
            if desc.methods[..i]
                .iter()
                .any(|m| m.name.eq_ignore_ascii_case(&method.name))
            {
                rval = self.fire(
                    &desc.name,
                    None,
                    LintCode::DuplicateMethod,
                    format!("METHOD '{}' is defined twice", method.name),
                );
            }
            let code = self.check_method_list(&desc.name, &method.body, LintContext::NONE);
            if !code.is_okay() {
                self.banner(&desc.name, &format!("METHOD '{}'", method.name));
                rval = code;
            }
        }
        rval
    }

    fn check_method_list(
        &mut self,
        type_name: &str,
        stmts: &[Statement],
        context: LintContext,
    ) -> LintCode {
        let mut rval = LintCode::Okay;
        for stmt in stmts {
            let code = match &stmt.kind {
                StatementKind::Relation { .. } | StatementKind::LogRelation { .. } => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    format!(
                        "{} is not allowed in methods; perhaps '=' or '==' should be ':='?",
                        stmt.keyword()
                    ),
                ),
                StatementKind::When { .. } => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    "WHEN is not allowed in methods; perhaps WHEN should be SWITCH?",
                ),
                StatementKind::Select { .. } => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    "SELECT is not allowed in methods; perhaps SELECT should be SWITCH?",
                ),
                StatementKind::For { kind, body, .. } => {
                    if *kind == ForKind::Do {
                        self.check_method_list(type_name, body, context.with(LintContext::FOR))
                    } else {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::ForNotMethod,
                            format!("FOR/{:?} is not allowed in methods; use FOR/DO", kind),
                        )
                    }
                }
                StatementKind::External { mode, .. } => match mode {
                    ExtMode::Method => LintCode::Okay,
                    ExtMode::Blackbox => self.fire(
                        type_name,
                        Some(stmt),
                        LintCode::StatementMislocated,
                        "EXTERNAL black boxes are not allowed in methods",
                    ),
                },
                StatementKind::Assign { .. }
                | StatementKind::Run { .. }
                | StatementKind::Fix { .. }
                | StatementKind::Free { .. }
                | StatementKind::Call { .. }
                | StatementKind::Assert { .. } => LintCode::Okay,
                StatementKind::While { body, .. } => {
                    self.check_method_list(type_name, body, context.with(LintContext::WHILE))
                }
                StatementKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    let mut code = self.check_method_list(
                        type_name,
                        then_body,
                        context.with(LintContext::IF),
                    );
                    if let Some(body) = else_body {
                        let other = self.check_method_list(
                            type_name,
                            body,
                            context.with(LintContext::IF),
                        );
                        if !other.is_okay() {
                            code = other;
                        }
                    }
                    code
                }
                StatementKind::Switch { cases, .. } => {
                    let mut code = LintCode::Okay;
                    for case in cases {
                        let other = self.check_method_list(
                            type_name,
                            &case.body,
                            context.with(LintContext::SWITCH),
                        );
                        if !other.is_okay() {
                            code = other;
                        }
                    }
                    code
                }
                StatementKind::Flow { flow, .. } => match flow {
                    FlowKind::Break
                        if !context.intersects(
                            LintContext::FOR.with(LintContext::SWITCH).with(LintContext::WHILE),
                        ) =>
                    {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::IllegalBreak,
                            "BREAK outside FOR, SWITCH or WHILE",
                        )
                    }
                    FlowKind::Continue
                        if !context.intersects(LintContext::FOR.with(LintContext::WHILE)) =>
                    {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::IllegalContinue,
                            "CONTINUE outside FOR or WHILE",
                        )
                    }
                    FlowKind::FallThrough if !context.intersects(LintContext::SWITCH) => {
                        self.fire(
                            type_name,
                            Some(stmt),
                            LintCode::IllegalFallThrough,
                            "FALL_THROUGH outside SWITCH",
                        )
                    }
                    _ => LintCode::Okay,
                },
                _ => self.fire(
                    type_name,
                    Some(stmt),
                    LintCode::StatementMislocated,
                    format!("{} is not allowed in methods", stmt.keyword()),
                ),
            };
            if !code.is_okay() {
                rval = code;
            }
        }
        rval
    }

    /// Arity of an IS_A or IS_REFINED_TO of a model type. `None` when the
    /// argument count is right or the type is not a model.
    fn check_arity(
        &mut self,
        type_name: &str,
        stmt: &Statement,
        target: &str,
        found: usize,
    ) -> Option<LintCode> {
        let Some(desc) = self.library.find(target) else {
            return Some(self.fire(
                type_name,
                Some(stmt),
                LintCode::UnknownType,
                format!("Type '{}' not found", target),
            ));
        };
        if desc.kind != BaseKind::Model {
            return None;
        }
        let expected = expected_args(self.library, &desc);
        if expected == found {
            return None;
        }
        Some(self.fire(
            type_name,
            Some(stmt),
            LintCode::ArgNumIncorrect,
            format!("Type {} needs {} arguments. Got {}.", target, expected, found),
        ))
    }

    fn check_simple_names(
        &mut self,
        type_name: &str,
        stmt: &Statement,
        names: &[Name],
        message: &str,
    ) -> LintCode {
        match names.iter().position(Name::is_compound) {
            Some(i) => self.fire(
                type_name,
                Some(stmt),
                LintCode::NameIncorrect,
                format!("{}; name {} is incorrect", message, i + 1),
            ),
            None => LintCode::Okay,
        }
    }
}

/// Arguments an IS_A of `desc` must supply: every inherited parameter name
/// not fixed by a reduction.
fn expected_args(library: &TypeLibrary, desc: &TypeDescription) -> usize {
    let params = library.full_section(&desc.name, Section::Parameters).unwrap_or_default();
    let reductions = library.full_section(&desc.name, Section::Reductions).unwrap_or_default();
    let reduced: Vec<&str> = reductions
        .iter()
        .filter_map(|s| match &s.kind {
            StatementKind::ConstAssign { target, .. } => target.base_id(),
            _ => None,
        })
        .collect();
    params
        .iter()
        .flat_map(|s| match &s.kind {
            StatementKind::IsA { names, .. } | StatementKind::WillBe { names, .. } => {
                names.as_slice()
            }
            _ => &[],
        })
        .filter(|n| n.base_id().is_some_and(|id| !reduced.contains(&id)))
        .count()
}

fn contains_select(stmts: &[Statement]) -> bool {
    stmts.iter().any(|s| {
        matches!(s.kind, StatementKind::Select { .. })
            || s.sub_statements().into_iter().any(contains_select)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ascend_core::{Expr, FlowKind, TypeBuilder, ValueType, WarningLevel};

    fn library() -> TypeLibrary {
        let mut lib = TypeLibrary::new();
        for t in ascend_core::fundamental_types() {
            lib.add(t).unwrap();
        }
        lib.add(
            TypeBuilder::model("tank")
                .param(Statement::set_of("S", "integer_constant", None))
                .build(),
        )
        .unwrap();
        lib.add(TypeBuilder::atom("temperature", ValueType::Real).refines("real").build())
            .unwrap();
        lib
    }

    fn codes(reporter: &Reporter) -> Vec<&'static str> {
        reporter
            .entries()
            .iter()
            .filter_map(|d| match d.code {
                DiagnosticCode::Lint(name) if name != "SUMMARY" => Some(name),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_body_arity_and_names() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::All);
        let body = vec![
            Statement::is_a(&["t"], "tank"),
            Statement::is_a_named(vec![Name::path("a.b")], "real", vec![]),
            Statement::is_a(&["ok"], "temperature"),
        ];
        let code =
            Linter::new(&lib, &mut reporter).check_body("plant", &body, LintContext::NONE, 0);
        assert_eq!(code, LintCode::NameIncorrect);
        assert_eq!(codes(&reporter), vec!["ARGNUM_INCORRECT", "NAME_INCORRECT"]);
        assert!(reporter
            .entries()
            .iter()
            .any(|d| d.message == "Errors detected in declarative section of 'plant'"));
    }

    #[test]
    fn test_banner_only_at_top_level() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::All);
        let body = vec![Statement::for_each(
            "i",
            vec![ascend_core::SetItem::Range(Expr::Int(1), Expr::Int(3))],
            ForKind::Create,
            vec![Statement::new(StatementKind::Use { name: Name::id("r") })],
        )];
        let code = Linter::new(&lib, &mut reporter).check_body("m", &body, LintContext::NONE, 0);
        assert_eq!(code, LintCode::UseNotWhen);
        let banners = reporter
            .entries()
            .iter()
            .filter(|d| d.code == DiagnosticCode::Lint("SUMMARY"))
            .count();
        assert_eq!(banners, 1);
    }

    #[test]
    fn test_body_assignment_is_a_style_note() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::All);
        let body = vec![Statement::assign(Name::id("x"), Expr::real(1.0))];
        let code = Linter::new(&lib, &mut reporter).check_body("m", &body, LintContext::NONE, 0);
        assert!(code.is_okay());
        assert_eq!(reporter.entries()[0].severity, Severity::Note);
        assert!(!reporter.has_errors());
    }

    #[test]
    fn test_flow_placement_in_methods() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::All);
        let desc = TypeBuilder::model("m")
            .method("bad", vec![Statement::flow(FlowKind::Break)])
            .method(
                "good",
                vec![Statement::for_each(
                    "i",
                    vec![ascend_core::SetItem::Range(Expr::Int(1), Expr::Int(2))],
                    ForKind::Do,
                    vec![Statement::flow(FlowKind::Break)],
                )],
            )
            .build();
        let code = Linter::new(&lib, &mut reporter).check_methods(&desc);
        assert_eq!(code, LintCode::IllegalBreak);
        assert_eq!(codes(&reporter), vec!["ILLEGAL_BREAK"]);
    }

    #[test]
    fn test_parameter_rules() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::All);
        let params = vec![
            Statement::is_a(&["x"], "real"),
            Statement::will_be(&["r"], "relation"),
            Statement::set_of("S", "integer_constant", None),
        ];
        let code = Linter::new(&lib, &mut reporter).check_parameters("m", &params);
        assert_eq!(code, LintCode::IllegalParam);
        assert_eq!(codes(&reporter), vec!["ILLEGAL_VALPAR", "ILLEGAL_PARAM"]);
    }

    #[test]
    fn test_warning_level_hides_notes() {
        let lib = library();
        let mut reporter = Reporter::new(WarningLevel::Warnings);
        let body = vec![Statement::assign(Name::id("x"), Expr::real(1.0))];
        Linter::new(&lib, &mut reporter).check_body("m", &body, LintContext::NONE, 0);
        assert_eq!(reporter.count(), 0);
        assert_eq!(reporter.suppressed(), 1);
    }
}
