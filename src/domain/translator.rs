//! Semantic translation: AST to [`StrategyIr`].
//!
//! Resolves names against user variables, built-in series and the
//! [`Builtin`] table, type-checks every expression, allocates one
//! [`IndicatorSpec`] per stateful call site and lowers statements into
//! instructions. The `Update` for an indicator is emitted immediately before
//! the top-level statement that contains the call, so every indicator is
//! advanced exactly once per bar even when its call sits inside an `if`.

use std::collections::{HashMap, HashSet};

use crate::domain::ast::{
    Argument, AssignMode, BinaryOperator, DeclarationKind, Expr, Literal, Script, Stmt,
    StrategyKind, TypeHint, UnaryOperator,
};
use crate::domain::builtin::{self, BoundArgs, Builtin, ParamKind};
use crate::domain::error::SemanticError;
use crate::domain::eval::Value;
use crate::domain::indicator::IndicatorSpec;
use crate::domain::ir::{
    ConstValue, IndicatorHandle, InputInfo, Instruction, IrExpr, MathFn, OrderInstruction,
    OrderKind, SeriesField, SlotId, SlotInfo, StrategyIr, ValueType,
};
use crate::domain::position::Direction;
use crate::domain::strategy::StrategySettings;

#[derive(Debug, Clone)]
enum Binding {
    Slot {
        slot: SlotId,
        value_type: ValueType,
        /// Set for never-reassigned declarations with a constant initialiser.
        constant: Option<ConstValue>,
    },
    Text(String),
}

struct Translator<'a> {
    overrides: &'a HashMap<String, f64>,
    reassigned: HashSet<String>,
    scopes: Vec<HashMap<String, Binding>>,
    slots: Vec<SlotInfo>,
    indicators: Vec<IndicatorSpec>,
    pending: Vec<Instruction>,
    instructions: Vec<Instruction>,
    settings: Option<StrategySettings>,
    inputs: Vec<InputInfo>,
    /// Variable currently being declared; keys input overrides.
    target: Option<String>,
    /// Slots written inside a block of the current top-level statement.
    block_writes: HashSet<SlotId>,
}

fn mismatch(context: impl Into<String>, expected: ValueType, found: ValueType, position: usize) -> SemanticError {
    SemanticError::TypeMismatch {
        context: context.into(),
        expected,
        found,
        position,
    }
}

fn invalid(function: &str, reason: impl Into<String>, position: usize) -> SemanticError {
    SemanticError::InvalidArgument {
        function: function.to_string(),
        reason: reason.into(),
        position,
    }
}

fn hint_type(hint: TypeHint) -> ValueType {
    match hint {
        TypeHint::Int | TypeHint::Float => ValueType::Number,
        TypeHint::Bool => ValueType::Bool,
        TypeHint::Str => ValueType::Text,
    }
}

fn is_reserved(name: &str) -> bool {
    SeriesField::from_name(name).is_some()
        || name.starts_with("strategy.")
        || name.starts_with("ta.")
        || name.starts_with("math.")
}

/// A literal, or a negated numeric literal.
fn literal_const(expr: &Expr) -> Option<ConstValue> {
    match expr {
        Expr::Literal { value, .. } => match value {
            Literal::Number(x) => Some(ConstValue::Number(*x)),
            Literal::Bool(b) => Some(ConstValue::Bool(*b)),
            Literal::Str(s) => Some(ConstValue::Text(s.clone())),
            Literal::Na => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Neg,
            operand,
            ..
        } => match literal_const(operand)? {
            ConstValue::Number(x) => Some(ConstValue::Number(-x)),
            _ => None,
        },
        _ => None,
    }
}

fn collect_reassigned(statements: &[Stmt], out: &mut HashSet<String>) {
    for stmt in statements {
        match stmt {
            Stmt::Assignment {
                target,
                mode: AssignMode::Reassign,
                ..
            } => {
                out.insert(target.clone());
            }
            Stmt::IfBlock {
                then_body,
                else_body,
                ..
            } => {
                collect_reassigned(then_body, out);
                collect_reassigned(else_body, out);
            }
            _ => {}
        }
    }
}

/// First slot in `expr` that belongs to `slots`.
fn slot_in(expr: &IrExpr, slots: &HashSet<SlotId>) -> Option<SlotId> {
    match expr {
        IrExpr::Slot(slot) => Some(*slot).filter(|s| slots.contains(s)),
        IrExpr::Const(_) | IrExpr::Series(_) | IrExpr::Indicator(_) => None,
        IrExpr::Unary { operand, .. } => slot_in(operand, slots),
        IrExpr::Math { arg, .. } => slot_in(arg, slots),
        IrExpr::IsNa(inner) => slot_in(inner, slots),
        IrExpr::Binary { left, right, .. }
        | IrExpr::Max(left, right)
        | IrExpr::Min(left, right)
        | IrExpr::Nz {
            value: left,
            replacement: right,
        } => slot_in(left, slots).or_else(|| slot_in(right, slots)),
    }
}

fn stateful_spec(builtin: Builtin, length: i64) -> Option<IndicatorSpec> {
    let spec = match builtin {
        Builtin::Sma => IndicatorSpec::Sma { length },
        Builtin::Ema => IndicatorSpec::Ema { length },
        Builtin::Rma => IndicatorSpec::Rma { length },
        Builtin::Wma => IndicatorSpec::Wma { length },
        Builtin::Highest => IndicatorSpec::Highest { length },
        Builtin::Lowest => IndicatorSpec::Lowest { length },
        Builtin::Stdev => IndicatorSpec::Stdev { length },
        Builtin::Rsi => IndicatorSpec::Rsi { length },
        Builtin::Atr => IndicatorSpec::Atr { length },
        Builtin::Change => IndicatorSpec::Change { length },
        Builtin::Roc => IndicatorSpec::Roc { length },
        Builtin::Crossover => IndicatorSpec::Crossover,
        Builtin::Crossunder => IndicatorSpec::Crossunder,
        Builtin::Cross => IndicatorSpec::Cross,
        _ => return None,
    };
    Some(spec)
}

impl<'a> Translator<'a> {
    fn new(overrides: &'a HashMap<String, f64>) -> Self {
        Self {
            overrides,
            reassigned: HashSet::new(),
            scopes: vec![HashMap::new()],
            slots: Vec::new(),
            indicators: Vec::new(),
            pending: Vec::new(),
            instructions: Vec::new(),
            settings: None,
            inputs: Vec::new(),
            target: None,
            block_writes: HashSet::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn declare(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    /// Register an indicator whose `Update` runs before the enclosing
    /// top-level statement. Its inputs cannot read a slot written earlier in
    /// that statement's blocks, since the update would see last bar's value.
    fn allocate_indicator(
        &mut self,
        function: &str,
        spec: IndicatorSpec,
        inputs: Vec<IrExpr>,
        position: usize,
    ) -> Result<IndicatorHandle, SemanticError> {
        if let Some(slot) = inputs.iter().find_map(|e| slot_in(e, &self.block_writes)) {
            let name = &self.slots[slot.0].name;
            return Err(invalid(
                function,
                format!("input reads '{name}', which is assigned inside the same if block; compute it at top level"),
                position,
            ));
        }
        let handle = IndicatorHandle(self.indicators.len());
        self.indicators.push(spec);
        self.pending.push(Instruction::Update { handle, inputs });
        Ok(handle)
    }

    fn note_write(&mut self, slot: SlotId) {
        if self.scopes.len() > 1 {
            self.block_writes.insert(slot);
        }
    }

    fn run(mut self, script: &Script) -> Result<StrategyIr, SemanticError> {
        collect_reassigned(&script.statements, &mut self.reassigned);

        for stmt in &script.statements {
            let mut out = Vec::new();
            self.block_writes.clear();
            self.statement(stmt, &mut out)?;
            self.instructions.append(&mut self.pending);
            self.instructions.append(&mut out);
        }

        let settings = self.settings.ok_or_else(|| SemanticError::NotAStrategy {
            reason: "missing strategy(...) header".to_string(),
            position: 0,
        })?;

        Ok(StrategyIr {
            settings,
            instructions: self.instructions,
            indicators: self.indicators,
            slots: self.slots,
            inputs: self.inputs,
        })
    }

    fn block(&mut self, body: &[Stmt]) -> Result<Vec<Instruction>, SemanticError> {
        self.scopes.push(HashMap::new());
        let mut out = Vec::new();
        let result = body.iter().try_for_each(|stmt| self.statement(stmt, &mut out));
        self.scopes.pop();
        result.map(|_| out)
    }

    fn statement(&mut self, stmt: &Stmt, out: &mut Vec<Instruction>) -> Result<(), SemanticError> {
        match stmt {
            Stmt::Declaration {
                kind,
                args,
                position,
            } => self.header(*kind, args, *position),
            Stmt::Assignment {
                target,
                mode: AssignMode::Reassign,
                value,
                position,
                ..
            } => {
                let instruction = self.reassign(target, value, *position)?;
                out.push(instruction);
                Ok(())
            }
            Stmt::Assignment {
                target,
                mode,
                type_hint,
                value,
                position,
            } => {
                if let Some(instruction) =
                    self.declaration(target, *mode, *type_hint, value, *position)?
                {
                    out.push(instruction);
                }
                Ok(())
            }
            Stmt::IfBlock {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let (condition_ir, ty) = self.expr(condition)?;
                if ty != ValueType::Bool {
                    return Err(mismatch("if condition", ValueType::Bool, ty, condition.position()));
                }
                let then_branch = self.block(then_body)?;
                let else_branch = self.block(else_body)?;
                out.push(Instruction::If {
                    condition: condition_ir,
                    then_branch,
                    else_branch,
                });
                Ok(())
            }
            Stmt::StrategyStatement {
                kind,
                args,
                position,
            } => {
                let order = self.order(*kind, args, *position)?;
                out.push(Instruction::Order(order));
                Ok(())
            }
            Stmt::Expr(Expr::Call { name, .. })
                if Builtin::resolve(name) == Some(Builtin::Cosmetic) =>
            {
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.expr(expr)?;
                Ok(())
            }
        }
    }

    fn header(
        &mut self,
        kind: DeclarationKind,
        args: &[Argument],
        position: usize,
    ) -> Result<(), SemanticError> {
        if kind == DeclarationKind::Indicator {
            return Err(SemanticError::NotAStrategy {
                reason: "indicator scripts cannot be backtested".to_string(),
                position,
            });
        }
        if self.scopes.len() > 1 {
            return Err(SemanticError::NotAStrategy {
                reason: "strategy(...) must be declared at top level".to_string(),
                position,
            });
        }
        if self.settings.is_some() {
            return Err(SemanticError::DuplicateDeclaration {
                name: "strategy".to_string(),
                position,
            });
        }

        let bound = builtin::bind("strategy", builtin::STRATEGY_HEADER, args, position)?;
        let mut settings = StrategySettings::default();
        if let Some(title) = bound.get("title") {
            settings.title = self.const_text("strategy", title)?;
        }
        if let Some(e) = bound.get("initial_capital") {
            settings.initial_capital = self.const_number("strategy", "initial_capital", e)?;
            if settings.initial_capital <= 0.0 {
                return Err(invalid("strategy", "initial_capital must be positive", e.position()));
            }
        }
        if let Some(e) = bound.get("default_qty_value") {
            settings.default_qty = self.const_number("strategy", "default_qty_value", e)?;
            if settings.default_qty <= 0.0 {
                return Err(invalid("strategy", "default_qty_value must be positive", e.position()));
            }
        }
        if let Some(e) = bound.get("pyramiding") {
            let n = self.const_number("strategy", "pyramiding", e)?;
            if n < 0.0 || n.fract() != 0.0 {
                return Err(invalid(
                    "strategy",
                    "pyramiding must be a non-negative integer",
                    e.position(),
                ));
            }
            settings.pyramiding = n as u32;
        }
        if let Some(e) = bound.get("commission_value") {
            let pct = self.const_number("strategy", "commission_value", e)?;
            if pct < 0.0 {
                return Err(invalid("strategy", "commission_value must not be negative", e.position()));
            }
            settings.commission_pct = Some(pct);
        }
        self.settings = Some(settings);
        Ok(())
    }

    fn declaration(
        &mut self,
        name: &str,
        mode: AssignMode,
        type_hint: Option<TypeHint>,
        value: &Expr,
        position: usize,
    ) -> Result<Option<Instruction>, SemanticError> {
        let in_scope = self.scopes.last().is_some_and(|s| s.contains_key(name));
        if in_scope || is_reserved(name) {
            return Err(SemanticError::DuplicateDeclaration {
                name: name.to_string(),
                position,
            });
        }

        self.target = Some(name.to_string());
        let result = self.declaration_value(name, mode, type_hint, value, position);
        self.target = None;
        result
    }

    fn declaration_value(
        &mut self,
        name: &str,
        mode: AssignMode,
        type_hint: Option<TypeHint>,
        value: &Expr,
        position: usize,
    ) -> Result<Option<Instruction>, SemanticError> {
        let context = format!("declaration of '{name}'");
        let constant = self.const_eval(value)?;

        if let Some(ConstValue::Text(text)) = constant {
            if let Some(hint) = type_hint.filter(|h| *h != TypeHint::Str) {
                return Err(mismatch(context, hint_type(hint), ValueType::Text, value.position()));
            }
            if self.reassigned.contains(name) {
                return Err(mismatch(context, ValueType::Number, ValueType::Text, value.position()));
            }
            self.declare(name, Binding::Text(text));
            return Ok(None);
        }

        let (expr, mut value_type) = self.expr(value)?;
        let is_na = matches!(
            value,
            Expr::Literal {
                value: Literal::Na,
                ..
            }
        );
        if let Some(hint) = type_hint {
            let expected = hint_type(hint);
            if is_na {
                value_type = expected;
            } else if expected != value_type {
                return Err(mismatch(context, expected, value_type, value.position()));
            }
        }

        let persistent = mode == AssignMode::Persistent;
        let constant = constant.filter(|_| !persistent && !self.reassigned.contains(name));
        let slot = SlotId(self.slots.len());
        self.slots.push(SlotInfo {
            name: name.to_string(),
            value_type,
            persistent,
        });
        self.note_write(slot);
        self.declare(
            name,
            Binding::Slot {
                slot,
                value_type,
                constant,
            },
        );

        let instruction = if persistent {
            Instruction::InitOnce { slot, expr }
        } else {
            Instruction::Assign { slot, expr }
        };
        Ok(Some(instruction))
    }

    fn reassign(&mut self, name: &str, value: &Expr, position: usize) -> Result<Instruction, SemanticError> {
        let (slot, slot_type) = match self.lookup(name) {
            Some(Binding::Slot {
                slot, value_type, ..
            }) => (*slot, *value_type),
            Some(Binding::Text(_)) => {
                return Err(mismatch(
                    format!("reassignment of '{name}'"),
                    ValueType::Number,
                    ValueType::Text,
                    position,
                ));
            }
            None => {
                return Err(SemanticError::UnresolvedIdentifier {
                    name: name.to_string(),
                    position,
                });
            }
        };
        let (expr, ty) = self.expr(value)?;
        let is_na = matches!(
            value,
            Expr::Literal {
                value: Literal::Na,
                ..
            }
        );
        if ty != slot_type && !is_na {
            return Err(mismatch(
                format!("reassignment of '{name}'"),
                slot_type,
                ty,
                value.position(),
            ));
        }
        self.note_write(slot);
        Ok(Instruction::Assign { slot, expr })
    }

    fn order(
        &mut self,
        kind: StrategyKind,
        args: &[Argument],
        position: usize,
    ) -> Result<OrderInstruction, SemanticError> {
        let function = kind.name();
        let (params, order_kind) = match kind {
            StrategyKind::Entry => (builtin::ENTRY, OrderKind::Entry),
            StrategyKind::Exit => (builtin::EXIT, OrderKind::Exit),
            StrategyKind::Close => (builtin::CLOSE, OrderKind::Close),
            StrategyKind::CloseAll => (builtin::CLOSE_ALL, OrderKind::CloseAll),
        };
        let bound = builtin::bind(function, params, args, position)?;
        let mut order = OrderInstruction::new(order_kind, position);

        for (param, expr) in bound.iter() {
            match param.name {
                "id" => order.id = Some(self.const_text(function, expr)?),
                "from_entry" => order.from_entry = Some(self.const_text(function, expr)?),
                "direction" => order.direction = Some(self.direction(function, expr)?),
                "when" => order.when = Some(self.typed(function, param.name, expr, ValueType::Bool)?),
                "qty" => order.qty = Some(self.typed(function, param.name, expr, ValueType::Number)?),
                "stop" => order.stop = Some(self.typed(function, param.name, expr, ValueType::Number)?),
                "limit" => {
                    order.limit = Some(self.typed(function, param.name, expr, ValueType::Number)?)
                }
                "profit" => {
                    order.profit = Some(self.typed(function, param.name, expr, ValueType::Number)?)
                }
                "loss" => order.loss = Some(self.typed(function, param.name, expr, ValueType::Number)?),
                _ => {}
            }
        }
        Ok(order)
    }

    fn direction(&self, function: &str, expr: &Expr) -> Result<Direction, SemanticError> {
        match expr {
            Expr::Identifier { name, .. } if name == "strategy.long" => Ok(Direction::Long),
            Expr::Identifier { name, .. } if name == "strategy.short" => Ok(Direction::Short),
            other => Err(invalid(
                function,
                "direction must be strategy.long or strategy.short",
                other.position(),
            )),
        }
    }

    /// Translate `expr` and require `expected`.
    fn typed(
        &mut self,
        function: &str,
        param: &str,
        expr: &Expr,
        expected: ValueType,
    ) -> Result<IrExpr, SemanticError> {
        let (ir, ty) = self.expr(expr)?;
        if ty != expected {
            return Err(mismatch(
                format!("argument '{param}' of {function}"),
                expected,
                ty,
                expr.position(),
            ));
        }
        Ok(ir)
    }

    fn const_text(&mut self, function: &str, expr: &Expr) -> Result<String, SemanticError> {
        match self.const_eval(expr)? {
            Some(ConstValue::Text(s)) => Ok(s),
            _ => Err(invalid(function, "expected a string constant", expr.position())),
        }
    }

    fn const_number(&mut self, function: &str, param: &str, expr: &Expr) -> Result<f64, SemanticError> {
        match self.const_eval(expr)? {
            Some(ConstValue::Number(x)) => Ok(x),
            _ => Err(invalid(
                function,
                format!("'{param}' must be a numeric constant"),
                expr.position(),
            )),
        }
    }

    fn length(&mut self, function: &str, expr: &Expr) -> Result<i64, SemanticError> {
        let n = self.const_number(function, "length", expr)?;
        if n.fract() != 0.0 || n.abs() > i64::MAX as f64 {
            return Err(invalid(function, format!("length must be an integer, got {n}"), expr.position()));
        }
        Ok(n as i64)
    }

    /// Evaluate `expr` at translation time, if it is constant.
    fn const_eval(&mut self, expr: &Expr) -> Result<Option<ConstValue>, SemanticError> {
        let value = match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Number(x) => Some(ConstValue::Number(*x)),
                Literal::Bool(b) => Some(ConstValue::Bool(*b)),
                Literal::Str(s) => Some(ConstValue::Text(s.clone())),
                Literal::Na => None,
            },
            Expr::Identifier { name, .. } => match self.lookup(name) {
                Some(Binding::Slot { constant, .. }) => constant.clone(),
                Some(Binding::Text(s)) => Some(ConstValue::Text(s.clone())),
                None => None,
            },
            Expr::UnaryOp {
                op: UnaryOperator::Neg,
                operand,
                ..
            } => match self.const_eval(operand)? {
                Some(ConstValue::Number(x)) => Some(ConstValue::Number(-x)),
                _ => None,
            },
            Expr::BinaryOp {
                op, left, right, ..
            } if op.is_arithmetic() => {
                let l = self.const_eval(left)?.and_then(|c| c.as_number());
                let r = self.const_eval(right)?.and_then(|c| c.as_number());
                match (l, r) {
                    (Some(a), Some(b)) => {
                        let x = match op {
                            BinaryOperator::Add => a + b,
                            BinaryOperator::Sub => a - b,
                            BinaryOperator::Mul => a * b,
                            BinaryOperator::Div => a / b,
                            _ => a % b,
                        };
                        Some(ConstValue::Number(x)).filter(|_| x.is_finite())
                    }
                    _ => None,
                }
            }
            Expr::Call {
                name,
                args,
                position,
            } => match Builtin::resolve(name) {
                Some(b) if b.is_input() => Some(self.input(b, name, args, *position)?),
                _ => None,
            },
            _ => None,
        };
        Ok(value)
    }

    /// Resolve an `input*()` call, applying any override.
    fn input(
        &mut self,
        builtin: Builtin,
        function: &str,
        args: &[Argument],
        position: usize,
    ) -> Result<ConstValue, SemanticError> {
        let bound = builtin::bind(function, builtin::INPUT, args, position)?;
        let Some(defval_expr) = bound.get("defval") else {
            return Err(invalid(function, "missing default value", position));
        };
        let default = literal_const(defval_expr)
            .ok_or_else(|| invalid(function, "default must be a literal", defval_expr.position()))?;

        let expected = match builtin {
            Builtin::InputInt | Builtin::InputFloat => Some(ValueType::Number),
            Builtin::InputBool => Some(ValueType::Bool),
            _ => None,
        };
        if let Some(expected) = expected.filter(|t| *t != default.value_type()) {
            return Err(mismatch(
                format!("default of {function}"),
                expected,
                default.value_type(),
                defval_expr.position(),
            ));
        }
        if builtin == Builtin::InputInt && default.as_number().is_some_and(|x| x.fract() != 0.0) {
            return Err(invalid(function, "default must be an integer", defval_expr.position()));
        }

        let title = match bound.get("title") {
            Some(e) => Some(self.const_text(function, e)?),
            None => None,
        };
        let name = self
            .target
            .clone()
            .or_else(|| title.clone())
            .unwrap_or_else(|| format!("input@{position}"));

        let override_value = self
            .overrides
            .get(&name)
            .or_else(|| title.as_ref().and_then(|t| self.overrides.get(t)))
            .copied();
        let value = match (&default, override_value) {
            (ConstValue::Number(_), Some(x)) => ConstValue::Number(x),
            (ConstValue::Bool(_), Some(x)) => ConstValue::Bool(x != 0.0),
            (d, _) => d.clone(),
        };

        if !self.inputs.iter().any(|i| i.position == position) {
            self.inputs.push(InputInfo {
                name,
                title,
                default,
                value: value.clone(),
                position,
            });
        }
        Ok(value)
    }

    fn expr(&mut self, expr: &Expr) -> Result<(IrExpr, ValueType), SemanticError> {
        match expr {
            Expr::Literal { value, position } => match value {
                Literal::Number(x) => Ok((IrExpr::Const(Value::Number(*x)), ValueType::Number)),
                Literal::Bool(b) => Ok((IrExpr::Const(Value::Bool(*b)), ValueType::Bool)),
                Literal::Na => Ok((IrExpr::Const(Value::Na), ValueType::Number)),
                Literal::Str(_) => Err(mismatch("expression", ValueType::Number, ValueType::Text, *position)),
            },
            Expr::Identifier { name, position } => self.identifier(name, *position),
            Expr::UnaryOp {
                op,
                operand,
                position,
            } => {
                let (inner, ty) = self.expr(operand)?;
                let expected = match op {
                    UnaryOperator::Neg => ValueType::Number,
                    UnaryOperator::Not => ValueType::Bool,
                };
                if ty != expected {
                    let context = match op {
                        UnaryOperator::Neg => "unary '-'",
                        UnaryOperator::Not => "'not'",
                    };
                    return Err(mismatch(context, expected, ty, *position));
                }
                Ok((
                    IrExpr::Unary {
                        op: *op,
                        operand: Box::new(inner),
                    },
                    expected,
                ))
            }
            Expr::BinaryOp {
                op, left, right, ..
            } => self.binary(*op, left, right),
            Expr::Index {
                target,
                offset,
                position,
            } => {
                let offset = self.length("history", offset).map_err(|e| match e {
                    SemanticError::InvalidArgument { reason, .. } => {
                        invalid("history", reason, *position)
                    }
                    other => other,
                })?;
                let (input, ty) = self.expr(target)?;
                let handle = self.allocate_indicator(
                    "history",
                    IndicatorSpec::History { offset },
                    vec![input],
                    *position,
                )?;
                Ok((IrExpr::Indicator(handle), ty))
            }
            Expr::Call {
                name,
                args,
                position,
            } => self.call(name, args, *position),
        }
    }

    fn identifier(&self, name: &str, position: usize) -> Result<(IrExpr, ValueType), SemanticError> {
        match self.lookup(name) {
            Some(Binding::Slot {
                slot, value_type, ..
            }) => return Ok((IrExpr::Slot(*slot), *value_type)),
            Some(Binding::Text(_)) => {
                return Err(mismatch(
                    format!("use of '{name}'"),
                    ValueType::Number,
                    ValueType::Text,
                    position,
                ));
            }
            None => {}
        }
        if let Some(field) = SeriesField::from_name(name) {
            return Ok((IrExpr::Series(field), ValueType::Number));
        }
        if name == "strategy.long" || name == "strategy.short" {
            return Err(invalid(
                name,
                "direction constants are only valid as an order direction",
                position,
            ));
        }
        Err(SemanticError::UnresolvedIdentifier {
            name: name.to_string(),
            position,
        })
    }

    fn binary(
        &mut self,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<(IrExpr, ValueType), SemanticError> {
        let (l, lt) = self.expr(left)?;
        let (r, rt) = self.expr(right)?;
        let context = format!("operator '{}'", op.symbol());

        let result_type = if op.is_arithmetic() || op.is_logical() {
            let operand = if op.is_logical() {
                ValueType::Bool
            } else {
                ValueType::Number
            };
            if lt != operand {
                return Err(mismatch(context, operand, lt, left.position()));
            }
            if rt != operand {
                return Err(mismatch(context, operand, rt, right.position()));
            }
            operand
        } else if matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq) {
            if lt != rt {
                return Err(mismatch(context, lt, rt, right.position()));
            }
            ValueType::Bool
        } else {
            if lt != ValueType::Number {
                return Err(mismatch(context, ValueType::Number, lt, left.position()));
            }
            if rt != ValueType::Number {
                return Err(mismatch(context, ValueType::Number, rt, right.position()));
            }
            ValueType::Bool
        };

        Ok((
            IrExpr::Binary {
                op,
                left: Box::new(l),
                right: Box::new(r),
            },
            result_type,
        ))
    }

    /// Translate a series argument that must be numeric.
    fn series_arg(
        &mut self,
        function: &str,
        bound: &BoundArgs<'_, '_>,
        param: &str,
        position: usize,
    ) -> Result<IrExpr, SemanticError> {
        let expr = bound
            .get(param)
            .ok_or_else(|| invalid(function, format!("missing required parameter '{param}'"), position))?;
        self.typed(function, param, expr, ValueType::Number)
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Argument],
        position: usize,
    ) -> Result<(IrExpr, ValueType), SemanticError> {
        let Some(builtin) = Builtin::resolve(name) else {
            return Err(SemanticError::UnknownFunction {
                name: name.to_string(),
                position,
            });
        };
        let Some(params) = builtin.params() else {
            return Err(invalid(name, "has no value", position));
        };
        let bound = builtin::bind(name, params, args, position)?;

        if builtin.is_input() {
            let value = self.input(builtin, name, args, position)?;
            return match value {
                ConstValue::Number(x) => Ok((IrExpr::Const(Value::Number(x)), ValueType::Number)),
                ConstValue::Bool(b) => Ok((IrExpr::Const(Value::Bool(b)), ValueType::Bool)),
                ConstValue::Text(_) => Err(mismatch(
                    format!("result of {name}"),
                    ValueType::Number,
                    ValueType::Text,
                    position,
                )),
            };
        }

        if let Some(spec_for) = stateful_spec(builtin, 0) {
            let mut inputs = Vec::new();
            for param in params {
                if param.kind != ParamKind::Series {
                    continue;
                }
                inputs.push(self.series_arg(name, &bound, param.name, position)?);
            }
            let spec = match spec_for.length() {
                Some(_) => {
                    let length = match bound.get("length") {
                        Some(e) => self.length(name, e)?,
                        None => bound.default_of("length").unwrap_or(1.0) as i64,
                    };
                    stateful_spec(builtin, length).unwrap_or(spec_for)
                }
                None => spec_for,
            };
            let output = spec.output_type(ValueType::Number);
            let handle = self.allocate_indicator(name, spec, inputs, position)?;
            return Ok((IrExpr::Indicator(handle), output));
        }

        let ir = match builtin {
            Builtin::Abs | Builtin::Sqrt | Builtin::Round | Builtin::Floor | Builtin::Ceil => {
                let func = match builtin {
                    Builtin::Abs => MathFn::Abs,
                    Builtin::Sqrt => MathFn::Sqrt,
                    Builtin::Round => MathFn::Round,
                    Builtin::Floor => MathFn::Floor,
                    _ => MathFn::Ceil,
                };
                let arg = self.series_arg(name, &bound, "number", position)?;
                (
                    IrExpr::Math {
                        func,
                        arg: Box::new(arg),
                    },
                    ValueType::Number,
                )
            }
            Builtin::Max | Builtin::Min => {
                let a = Box::new(self.series_arg(name, &bound, "number0", position)?);
                let b = Box::new(self.series_arg(name, &bound, "number1", position)?);
                let ir = if builtin == Builtin::Max {
                    IrExpr::Max(a, b)
                } else {
                    IrExpr::Min(a, b)
                };
                (ir, ValueType::Number)
            }
            Builtin::Nz => {
                let source = bound
                    .get("source")
                    .ok_or_else(|| invalid(name, "missing required parameter 'source'", position))?;
                let (value, ty) = self.expr(source)?;
                let replacement = match bound.get("replacement") {
                    Some(e) => self.typed(name, "replacement", e, ty)?,
                    None if ty == ValueType::Bool => IrExpr::Const(Value::Bool(false)),
                    None => IrExpr::Const(Value::Number(0.0)),
                };
                (
                    IrExpr::Nz {
                        value: Box::new(value),
                        replacement: Box::new(replacement),
                    },
                    ty,
                )
            }
            Builtin::Na => {
                let x = bound
                    .get("x")
                    .ok_or_else(|| invalid(name, "missing required parameter 'x'", position))?;
                let (value, _) = self.expr(x)?;
                (IrExpr::IsNa(Box::new(value)), ValueType::Bool)
            }
            _ => return Err(invalid(name, "has no value", position)),
        };
        Ok(ir)
    }
}

/// Translate a parsed script.
pub fn translate(script: &Script) -> Result<StrategyIr, SemanticError> {
    translate_with_inputs(script, &HashMap::new())
}

/// Translate with `input()` overrides, keyed by assigned variable name or
/// input title.
pub fn translate_with_inputs(
    script: &Script,
    overrides: &HashMap<String, f64>,
) -> Result<StrategyIr, SemanticError> {
    Translator::new(overrides).run(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PineError;
    use crate::domain::parser::parse;

    const HEADER: &str = "strategy(\"T\")\n";

    fn compile(body: &str) -> Result<StrategyIr, SemanticError> {
        let source = format!("{HEADER}{body}");
        let script = parse(&source).unwrap();
        translate(&script)
    }

    fn compile_err(body: &str) -> SemanticError {
        compile(body).unwrap_err()
    }

    #[test]
    fn header_fills_settings() {
        let script = parse(
            "strategy(\"Cross\", initial_capital=5000, default_qty_value=2, pyramiding=1, commission_value=0.05)\n",
        )
        .unwrap();
        let ir = translate(&script).unwrap();
        assert_eq!(ir.settings.title, "Cross");
        assert_eq!(ir.settings.initial_capital, 5000.0);
        assert_eq!(ir.settings.default_qty, 2.0);
        assert_eq!(ir.settings.pyramiding, 1);
        assert_eq!(ir.settings.commission_pct, Some(0.05));
    }

    #[test]
    fn missing_header_is_not_a_strategy() {
        let script = parse("x = close\n").unwrap();
        assert!(matches!(
            translate(&script),
            Err(SemanticError::NotAStrategy { .. })
        ));
    }

    #[test]
    fn indicator_header_is_rejected() {
        let script = parse("indicator(\"I\")\nx = close\n").unwrap();
        assert!(matches!(
            translate(&script),
            Err(SemanticError::NotAStrategy { position: 0, .. })
        ));
    }

    #[test]
    fn unknown_function() {
        let err = compile_err("x = ta.foo(close, 3)\n");
        assert_eq!(
            err,
            SemanticError::UnknownFunction {
                name: "ta.foo".into(),
                position: HEADER.len() + 4
            }
        );
    }

    #[test]
    fn indicator_table_in_call_order() {
        let ir = compile("fast = ta.sma(close, 5)\nslow = ta.ema(close, 20)\nx = ta.crossover(fast, slow)\n")
            .unwrap();
        assert_eq!(
            ir.indicators,
            vec![
                IndicatorSpec::Sma { length: 5 },
                IndicatorSpec::Ema { length: 20 },
                IndicatorSpec::Crossover,
            ]
        );
    }

    #[test]
    fn nested_calls_allocate_inner_first() {
        let ir = compile("x = ta.sma(ta.rsi(close, 14), 3)\n").unwrap();
        assert_eq!(
            ir.indicators,
            vec![IndicatorSpec::Rsi { length: 14 }, IndicatorSpec::Sma { length: 3 }]
        );
        assert!(matches!(
            &ir.instructions[1],
            Instruction::Update { inputs, .. } if inputs == &vec![IrExpr::Indicator(IndicatorHandle(0))]
        ));
    }

    #[test]
    fn updates_are_hoisted_out_of_if_bodies() {
        let ir = compile("if close > open\n    x = ta.sma(close, 3)\n").unwrap();
        assert!(matches!(ir.instructions[0], Instruction::Update { .. }));
        match &ir.instructions[1] {
            Instruction::If { then_branch, .. } => {
                assert_eq!(then_branch.len(), 1);
                assert!(matches!(then_branch[0], Instruction::Assign { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn indicator_input_declared_in_same_block_is_rejected() {
        let err = compile("if true\n    y = close * 2\n    s = ta.sma(y, 2)\n").unwrap_err();
        match err {
            SemanticError::InvalidArgument {
                function,
                reason,
                position,
            } => {
                assert_eq!(function, "ta.sma");
                assert!(reason.contains("'y'"));
                assert_eq!(position, HEADER.len() + "if true\n    y = close * 2\n    s = ".len());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn indicator_input_reassigned_in_same_block_is_rejected() {
        let err = compile("x = close\nif true\n    x := 100\n    h = ta.highest(x, 1)\n").unwrap_err();
        assert!(matches!(
            err,
            SemanticError::InvalidArgument { ref function, ref reason, .. }
                if function == "ta.highest" && reason.contains("'x'")
        ));

        let err = compile("x = close\nif true\n    x := 100\n    h = x[1]\n").unwrap_err();
        assert!(matches!(err, SemanticError::InvalidArgument { ref function, .. } if function == "history"));
    }

    #[test]
    fn indicator_inputs_written_outside_the_block_are_accepted() {
        compile("y = close * 2\nif true\n    s = ta.sma(y, 2)\n").unwrap();
        compile("x = close\nif true\n    x := 100\nh = ta.highest(x, 1)\n").unwrap();
        compile("x = close\nif true\n    h = ta.highest(x, 1)\n    x := 100\n").unwrap();
        compile("if true\n    y = close\nif true\n    s = ta.sma(close, 2)\n").unwrap();
    }

    #[test]
    fn history_index_allocates_spec() {
        let ir = compile("prev = close[1]\nflag = close > open\nwas = flag[2]\n").unwrap();
        assert_eq!(
            ir.indicators,
            vec![
                IndicatorSpec::History { offset: 1 },
                IndicatorSpec::History { offset: 2 }
            ]
        );
        assert_eq!(ir.slots[2].value_type, ValueType::Bool);
    }

    #[test]
    fn retranslation_is_identical() {
        let source = format!(
            "{HEADER}len = input.int(3)\nx = ta.sma(close, len)\nif ta.crossover(close, x)\n    strategy.entry(\"L\", strategy.long)\n"
        );
        let script = parse(&source).unwrap();
        let a = translate(&script).unwrap();
        let b = translate(&script).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn numeric_if_condition_is_type_mismatch() {
        let err = compile_err("if close\n    x = 1\n");
        assert!(matches!(
            err,
            SemanticError::TypeMismatch {
                expected: ValueType::Bool,
                found: ValueType::Number,
                ..
            }
        ));
    }

    #[test]
    fn and_on_numbers_is_type_mismatch() {
        assert!(matches!(
            compile_err("x = close and open\n"),
            SemanticError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn arithmetic_on_bool_is_type_mismatch() {
        assert!(matches!(
            compile_err("x = (close > open) + 1\n"),
            SemanticError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn reassign_with_other_type_is_type_mismatch() {
        assert!(matches!(
            compile_err("var x = 0\nx := true\n"),
            SemanticError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn reassign_undeclared_is_unresolved() {
        assert!(matches!(
            compile_err("y := 1\n"),
            SemanticError::UnresolvedIdentifier { .. }
        ));
    }

    #[test]
    fn unknown_identifier_is_unresolved() {
        assert!(matches!(
            compile_err("x = foo + 1\n"),
            SemanticError::UnresolvedIdentifier { .. }
        ));
    }

    #[test]
    fn duplicate_declaration_in_same_scope() {
        assert!(matches!(
            compile_err("x = 1\nx = 2\n"),
            SemanticError::DuplicateDeclaration { .. }
        ));
        assert!(matches!(
            compile_err("close = 1\n"),
            SemanticError::DuplicateDeclaration { .. }
        ));
        // a nested block is a new scope
        assert!(compile("x = 1\nif true\n    x = 2\n").is_ok());
    }

    #[test]
    fn non_constant_length_is_invalid_argument() {
        assert!(matches!(
            compile_err("n = close\nx = ta.sma(close, n)\n"),
            SemanticError::InvalidArgument { .. }
        ));
        assert!(matches!(
            compile_err("x = ta.sma(close, 2.5)\n"),
            SemanticError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn constant_folded_length() {
        let ir = compile("n = 4\nx = ta.sma(close, n * 2 + 1)\n").unwrap();
        assert_eq!(ir.indicators, vec![IndicatorSpec::Sma { length: 9 }]);
    }

    #[test]
    fn reassigned_name_is_not_constant() {
        assert!(matches!(
            compile_err("n = 4\nn := 5\nx = ta.sma(close, n)\n"),
            SemanticError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn zero_length_translates_and_fails_at_instantiation() {
        let ir = compile("x = ta.sma(close, 0)\n").unwrap();
        assert!(ir.indicators[0].instantiate().is_err());
    }

    #[test]
    fn input_overrides_by_name_and_title() {
        let source = format!("{HEADER}fast = input.int(5, \"Fast\")\nslow = input(20)\nx = ta.sma(close, fast)\ny = ta.sma(close, slow)\n");
        let script = parse(&source).unwrap();
        let overrides = HashMap::from([("Fast".to_string(), 7.0), ("slow".to_string(), 30.0)]);
        let ir = translate_with_inputs(&script, &overrides).unwrap();
        assert_eq!(
            ir.indicators,
            vec![IndicatorSpec::Sma { length: 7 }, IndicatorSpec::Sma { length: 30 }]
        );
        assert_eq!(ir.inputs.len(), 2);
        assert_eq!(ir.inputs[0].name, "fast");
        assert_eq!(ir.inputs[0].default, ConstValue::Number(5.0));
        assert_eq!(ir.inputs[0].value, ConstValue::Number(7.0));
    }

    #[test]
    fn text_constants_as_order_ids() {
        let ir = compile("id = \"Long\"\nstrategy.entry(id, strategy.long, qty=2)\n").unwrap();
        match &ir.instructions[0] {
            Instruction::Order(order) => {
                assert_eq!(order.kind, OrderKind::Entry);
                assert_eq!(order.id.as_deref(), Some("Long"));
                assert_eq!(order.direction, Some(Direction::Long));
                assert!(order.qty.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn order_argument_errors() {
        assert!(matches!(
            compile_err("strategy.entry(\"L\", 1)\n"),
            SemanticError::InvalidArgument { .. }
        ));
        assert!(matches!(
            compile_err("strategy.entry(\"L\", strategy.long, when=close)\n"),
            SemanticError::TypeMismatch { .. }
        ));
        assert!(matches!(
            compile_err("strategy.close()\n"),
            SemanticError::InvalidArgument { .. }
        ));
        assert!(matches!(
            compile_err("x = strategy.long\n"),
            SemanticError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn exit_bracket_arguments() {
        let ir = compile("strategy.exit(\"X\", from_entry=\"L\", stop=close - 5, limit=close + 5)\n")
            .unwrap();
        match &ir.instructions[0] {
            Instruction::Order(order) => {
                assert_eq!(order.kind, OrderKind::Exit);
                assert_eq!(order.from_entry.as_deref(), Some("L"));
                assert!(order.stop.is_some() && order.limit.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn var_uses_init_once() {
        let ir = compile("var int count = 0\ncount := count + 1\n").unwrap();
        assert!(matches!(ir.instructions[0], Instruction::InitOnce { .. }));
        assert!(matches!(ir.instructions[1], Instruction::Assign { .. }));
        assert!(ir.slots[0].persistent);
    }

    #[test]
    fn typed_na_declaration() {
        let ir = compile("var bool flag = na\nflag := close > open\n").unwrap();
        assert_eq!(ir.slots[0].value_type, ValueType::Bool);
    }

    #[test]
    fn cosmetic_calls_are_ignored() {
        let ir = compile("plot(close, color=color.red)\n").unwrap();
        assert!(ir.instructions.is_empty());
    }

    #[test]
    fn semantic_error_surfaces_through_pine_error() {
        let err = PineError::from(compile_err("x = nope\n"));
        assert_eq!(err.exit_status(), 4);
    }
}
