use std::fmt;

/// A relational test used by `if` and `while` headers.
///
/// Both backends evaluate it as `top OP second`, where `top` is the most recently
/// pushed value. Evaluation never pops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Eq,
    Neq,
    Gt,
    Lt,
    Geq,
    Leq,
}

impl Relation {
    pub fn evaluate(self, top: i64, second: i64) -> bool {
        match self {
            Relation::Eq => top == second,
            Relation::Neq => top != second,
            Relation::Gt => top > second,
            Relation::Lt => top < second,
            Relation::Geq => top >= second,
            Relation::Leq => top <= second,
        }
    }

    /// The signed `icmp` predicate with the same operand order.
    pub fn predicate(self) -> &'static str {
        match self {
            Relation::Eq => "eq",
            Relation::Neq => "ne",
            Relation::Gt => "sgt",
            Relation::Lt => "slt",
            Relation::Geq => "sge",
            Relation::Leq => "sle",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Eq => "==",
            Relation::Neq => "!=",
            Relation::Gt => ">",
            Relation::Lt => "<",
            Relation::Geq => ">=",
            Relation::Leq => "<=",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::Relation;
    use test_case::test_case;

    #[test_case(Relation::Eq, 3, 3, true)]
    #[test_case(Relation::Neq, 3, 3, false)]
    #[test_case(Relation::Gt, 4, 3, true ; "gt compares top against second")]
    #[test_case(Relation::Lt, 4, 3, false ; "lt compares top against second")]
    #[test_case(Relation::Geq, 3, 3, true)]
    #[test_case(Relation::Leq, -1, 0, true)]
    fn evaluate(relation: Relation, top: i64, second: i64, expected: bool) {
        assert_eq!(relation.evaluate(top, second), expected);
    }
}
