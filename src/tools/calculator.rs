//! 计算工具：四则运算表达式求值
//!
//! 只接受 0-9 + - * / ( ) . 和空白；自带递归下降解析器，不依赖任何动态求值。
//! 整数结果格式化时去掉小数部分（14.0 -> "14"）。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{input_as_str, Tool};

/// 数学计算工具
#[derive(Debug, Default)]
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "执行数学计算，支持加减乘除与括号，如 2 + 3 * 4"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["calculate".to_string()]
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let expression = input_as_str(&input);
        let cleaned: String = expression
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if cleaned.is_empty() {
            return Err("empty expression".to_string());
        }
        if let Some(bad) = cleaned.chars().find(|c| !"0123456789+-*/().".contains(*c)) {
            return Err(format!("invalid character in expression: {:?}", bad));
        }

        let value = eval(&cleaned)?;
        Ok(json!({
            "expression": expression,
            "result": value,
            "formatted": format_number(value),
        }))
    }
}

/// 整数值不带小数位，其余保留原样
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn eval(expr: &str) -> Result<f64, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut parser = Parser { chars, pos: 0 };
    let value = parser.expression()?;
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected trailing input at {}", parser.pos));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.bump();
                    acc += self.term()?;
                }
                '-' => {
                    self.bump();
                    acc -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.bump();
                    acc *= self.unary()?;
                }
                '/' => {
                    self.bump();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    acc /= rhs;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    // unary := ('-' | '+')* atom
    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.bump();
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.bump();
                self.unary()
            }
            _ => self.atom(),
        }
    }

    // atom := number | '(' expression ')'
    fn atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.bump();
                let value = self.expression()?;
                match self.bump() {
                    Some(')') => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.bump();
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                text.parse::<f64>()
                    .map_err(|e| format!("invalid number {:?}: {}", text, e))
            }
            other => Err(format!("unexpected token: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_precedence_and_parentheses() {
        let tool = CalculatorTool;
        let out = tool.execute(json!("2 + 3 * 4")).await.unwrap();
        assert_eq!(out["formatted"], "14");

        let out = tool.execute(json!("(2 + 3) * 4")).await.unwrap();
        assert_eq!(out["formatted"], "20");
    }

    #[tokio::test]
    async fn test_unary_minus_and_division() {
        let tool = CalculatorTool;
        let out = tool.execute(json!("-3 + 10 / 4")).await.unwrap();
        assert_eq!(out["result"].as_f64().unwrap(), -0.5);
    }

    #[tokio::test]
    async fn test_rejects_non_math_input() {
        let tool = CalculatorTool;
        assert!(tool.execute(json!("rm -rf /")).await.is_err());
        assert!(tool.execute(json!("")).await.is_err());
        assert!(tool.execute(json!("2 +")).await.is_err());
        assert!(tool.execute(json!("1/0")).await.is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(0.5), "0.5");
    }
}
