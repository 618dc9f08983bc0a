//! 树遍历解释器
//!
//! 解释器本身没有任何外部能力：只有变量、控制流和白名单内的纯函数。
//! 每一步都检查取消标志和步数预算，超时后由外部置位取消标志使其尽快停止。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sandbox::parser::{Expr, Stmt, UnaryOp};
use crate::sandbox::policy::SandboxPolicy;
use crate::sandbox::value::Value;
use crate::sandbox::{SandboxError, SandboxErrorKind};

enum Flow {
    Next(Value),
    Return(Value),
}

pub struct Interpreter<'a> {
    policy: &'a SandboxPolicy,
    cancel: &'a AtomicBool,
    steps: u64,
    scopes: Vec<HashMap<String, Value>>,
    lines: Vec<String>,
    output_chars: usize,
}

fn runtime(msg: impl Into<String>) -> SandboxError {
    SandboxError::new(SandboxErrorKind::Runtime, msg)
}

impl<'a> Interpreter<'a> {
    pub fn new(policy: &'a SandboxPolicy, cancel: &'a AtomicBool) -> Self {
        Self {
            policy,
            cancel,
            steps: 0,
            scopes: vec![HashMap::new()],
            lines: Vec::new(),
            output_chars: 0,
        }
    }

    /// 执行整段程序，返回打印内容加最终值
    pub fn run(mut self, program: &[Stmt]) -> Result<String, SandboxError> {
        let mut last = Value::Null;
        for stmt in program {
            match self.exec(stmt)? {
                Flow::Next(v) => last = v,
                Flow::Return(v) => {
                    last = v;
                    break;
                }
            }
        }

        // 只有打印输出时不再追加末尾的 null
        if self.lines.is_empty() || last != Value::Null {
            let rendered = last.to_string();
            self.emit(rendered)?;
        }
        Ok(self.lines.join("\n"))
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SandboxError::new(SandboxErrorKind::Timeout, "execution cancelled"));
        }
        self.steps += 1;
        if let Some(max) = self.policy.max_steps {
            if self.steps > max {
                return Err(SandboxError::new(
                    SandboxErrorKind::ResourceLimit,
                    format!("step budget of {} exhausted", max),
                ));
            }
        }
        Ok(())
    }

    fn emit(&mut self, line: String) -> Result<(), SandboxError> {
        self.output_chars += line.chars().count() + 1;
        if self.output_chars > self.policy.max_output_chars {
            return Err(SandboxError::new(
                SandboxErrorKind::ResourceLimit,
                format!("output longer than {} characters", self.policy.max_output_chars),
            ));
        }
        self.lines.push(line);
        Ok(())
    }

    /// 字符串值不得超过 max_value_chars；操作数已受约束，单次分配至多为上限的数倍
    fn bounded(&self, value: Value) -> Result<Value, SandboxError> {
        if let Value::Str(s) = &value {
            if s.len() > self.policy.max_value_chars && s.chars().count() > self.policy.max_value_chars {
                return Err(SandboxError::new(
                    SandboxErrorKind::ResourceLimit,
                    format!("string longer than {} characters", self.policy.max_value_chars),
                ));
            }
        }
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Result<Value, SandboxError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .ok_or_else(|| runtime(format!("{} is not defined", name)))
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<(), SandboxError> {
        match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(runtime(format!("assignment to undeclared variable {}", name))),
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow, SandboxError> {
        self.scopes.push(HashMap::new());
        let result = self.block_inner(stmts);
        self.scopes.pop();
        result
    }

    fn block_inner(&mut self, stmts: &[Stmt]) -> Result<Flow, SandboxError> {
        let mut last = Value::Null;
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Next(v) => last = v,
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Next(last))
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.tick()?;
        match stmt {
            Stmt::Let(name, expr) => {
                let value = self.eval(expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Next(Value::Null))
            }
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr)?;
                self.assign(name, value)?;
                Ok(Flow::Next(Value::Null))
            }
            Stmt::Expr(expr) => Ok(Flow::Next(self.eval(expr)?)),
            Stmt::If(cond, then, otherwise) => {
                if self.eval(cond)?.is_truthy() {
                    self.block(then)
                } else if let Some(otherwise) = otherwise {
                    self.block(otherwise)
                } else {
                    Ok(Flow::Next(Value::Null))
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.is_truthy() {
                    if let ret @ Flow::Return(_) = self.block(body)? {
                        return Ok(ret);
                    }
                }
                Ok(Flow::Next(Value::Null))
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Block(stmts) => self.block(stmts),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::Unary(UnaryOp::Neg, inner) => self.eval(inner)?.negate(),
            Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.bounded(Value::binary(*op, &left, &right)?)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Call(name, args) => {
                if !self.policy.is_allowed(name) {
                    return Err(SandboxError::new(
                        SandboxErrorKind::PolicyViolation,
                        format!("call to '{}' is not permitted", name),
                    ));
                }
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.call(name, args)?;
                self.bounded(result)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
        match name {
            "print" => {
                let line = args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
                self.emit(line)?;
                Ok(Value::Null)
            }
            "abs" => match one(name, args)? {
                Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| runtime("integer overflow")),
                v => Ok(Value::Float(number(name, &v)?.abs())),
            },
            "min" | "max" => {
                let mut iter = args.into_iter();
                let mut best = iter
                    .next()
                    .ok_or_else(|| runtime(format!("{}() needs at least one argument", name)))?;
                number(name, &best)?;
                for v in iter {
                    let (a, b) = (number(name, &best)?, number(name, &v)?);
                    if (name == "min" && b < a) || (name == "max" && b > a) {
                        best = v;
                    }
                }
                Ok(best)
            }
            "pow" => {
                let [base, exp] = two(name, args)?;
                if let (Value::Int(b), Value::Int(e)) = (&base, &exp) {
                    if let Ok(e) = u32::try_from(*e) {
                        return b.checked_pow(e).map(Value::Int).ok_or_else(|| runtime("integer overflow"));
                    }
                }
                Ok(Value::Float(number(name, &base)?.powf(number(name, &exp)?)))
            }
            "sqrt" => {
                let x = number(name, &one(name, args)?)?;
                if x < 0.0 {
                    return Err(runtime("sqrt() of a negative number"));
                }
                Ok(Value::Float(x.sqrt()))
            }
            "floor" | "ceil" | "round" => match one(name, args)? {
                Value::Int(n) => Ok(Value::Int(n)),
                v => {
                    let x = number(name, &v)?;
                    let r = match name {
                        "floor" => x.floor(),
                        "ceil" => x.ceil(),
                        _ => x.round(),
                    };
                    if r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64 {
                        Ok(Value::Int(r as i64))
                    } else {
                        Err(runtime(format!("{}() result out of range", name)))
                    }
                }
            },
            "len" => match one(name, args)? {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                v => Err(runtime(format!("len() expects a string, got {}", v.type_name()))),
            },
            "str" => Ok(Value::Str(one(name, args)?.to_string())),
            "upper" | "lower" => match one(name, args)? {
                Value::Str(s) if name == "upper" => Ok(Value::Str(s.to_uppercase())),
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                v => Err(runtime(format!("{}() expects a string, got {}", name, v.type_name()))),
            },
            other => Err(SandboxError::new(
                SandboxErrorKind::PolicyViolation,
                format!("unknown function '{}'", other),
            )),
        }
    }
}

fn one(name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
    let [v] = <[Value; 1]>::try_from(args)
        .map_err(|args| runtime(format!("{}() takes 1 argument, got {}", name, args.len())))?;
    Ok(v)
}

fn two(name: &str, args: Vec<Value>) -> Result<[Value; 2], SandboxError> {
    <[Value; 2]>::try_from(args)
        .map_err(|args| runtime(format!("{}() takes 2 arguments, got {}", name, args.len())))
}

fn number(name: &str, v: &Value) -> Result<f64, SandboxError> {
    v.as_f64()
        .ok_or_else(|| runtime(format!("{}() expects a number, got {}", name, v.type_name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse;

    fn run_with(src: &str, policy: &SandboxPolicy) -> Result<String, SandboxError> {
        let cancel = AtomicBool::new(false);
        let program = parse(src, policy.max_depth)?;
        Interpreter::new(policy, &cancel).run(&program)
    }

    fn run(src: &str) -> Result<String, SandboxError> {
        run_with(src, &SandboxPolicy::default())
    }

    #[test]
    fn test_final_value_is_output() {
        assert_eq!(run("1+1").unwrap(), "2");
        assert_eq!(run("let x = 2; x * 3.5").unwrap(), "7");
        assert_eq!(run("'ab' + 'c'").unwrap(), "abc");
        assert_eq!(run("").unwrap(), "null");
    }

    #[test]
    fn test_print_then_value() {
        assert_eq!(run("print('a', 1); print('b')").unwrap(), "a 1\nb");
        assert_eq!(run("print('a'); 42").unwrap(), "a\n42");
    }

    #[test]
    fn test_control_flow_and_scopes() {
        let src = "let total = 0; let i = 1;
                   while i <= 10 { if i % 2 == 0 { total = total + i } i = i + 1 }
                   total";
        assert_eq!(run(src).unwrap(), "30");

        let shadow = "let x = 1; { let x = 5; x = 6 } x";
        assert_eq!(run(shadow).unwrap(), "1");

        assert_eq!(run("let n = 3; while true { if n == 0 { return 'done' } n = n - 1 }").unwrap(), "done");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(run("max(3, 9, 4)").unwrap(), "9");
        assert_eq!(run("pow(2, 10)").unwrap(), "1024");
        assert_eq!(run("round(2.6) + floor(-1.5)").unwrap(), "1");
        assert_eq!(run("upper('hi') + len('héllo')").unwrap(), "HI5");
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(run("y + 1").unwrap_err().kind, SandboxErrorKind::Runtime);
        assert_eq!(run("z = 1").unwrap_err().kind, SandboxErrorKind::Runtime);
        assert_eq!(run("10 / 0").unwrap_err().kind, SandboxErrorKind::Runtime);
        assert_eq!(run("len(1, 2)").unwrap_err().kind, SandboxErrorKind::Runtime);
    }

    #[test]
    fn test_disallowed_call_is_policy_violation() {
        let err = run("require('fs')").unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::PolicyViolation);

        let mut policy = SandboxPolicy::default();
        policy.allowed_builtins.remove("print");
        assert_eq!(run_with("print(1)", &policy).unwrap_err().kind, SandboxErrorKind::PolicyViolation);
    }

    #[test]
    fn test_step_budget_and_output_limit() {
        let policy = SandboxPolicy::default().with_max_steps(Some(1_000));
        assert_eq!(run_with("while true {}", &policy).unwrap_err().kind, SandboxErrorKind::ResourceLimit);

        let policy = SandboxPolicy {
            max_output_chars: 16,
            ..SandboxPolicy::default()
        };
        let err = run_with("let i = 0; while i < 100 { print('xxxx'); i = i + 1 }", &policy).unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::ResourceLimit);
    }

    #[test]
    fn test_string_growth_is_bounded() {
        let policy = SandboxPolicy {
            max_value_chars: 64,
            ..SandboxPolicy::default()
        };
        let src = "let s = 'x'; let i = 0; while i < 40 { s = s + s; i = i + 1 } len(s)";
        let err = run_with(src, &policy).unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::ResourceLimit);

        assert_eq!(run_with("len('ab' + 'cd')", &policy).unwrap(), "4");
        let err = run_with("let s = 'abcdefgh'; s = s + s + s + s + s + s + s + s + s; upper(s)", &policy).unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::ResourceLimit);
    }

    #[test]
    fn test_cancel_flag_stops_execution() {
        let policy = SandboxPolicy::default().with_max_steps(None);
        let cancel = AtomicBool::new(true);
        let program = parse("while true {}", policy.max_depth).unwrap();
        let err = Interpreter::new(&policy, &cancel).run(&program).unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::Timeout);
    }
}
