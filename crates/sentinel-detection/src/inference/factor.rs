//! Discrete factors over dense variable indices.

/// Table over a set of variables; the last variable varies fastest
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Factor {
    vars: Vec<usize>,
    cards: Vec<usize>,
    values: Vec<f64>,
}

impl Factor {
    pub(crate) fn new(vars: Vec<usize>, cards: Vec<usize>, values: Vec<f64>) -> Self {
        debug_assert_eq!(vars.len(), cards.len());
        debug_assert_eq!(cards.iter().product::<usize>(), values.len());
        Self { vars, cards, values }
    }

    fn scalar(value: f64) -> Self {
        Self::new(Vec::new(), Vec::new(), vec![value])
    }

    pub(crate) fn vars(&self) -> &[usize] {
        &self.vars
    }

    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn contains(&self, var: usize) -> bool {
        self.vars.contains(&var)
    }

    fn strides(cards: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; cards.len()];
        for i in (0..cards.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * cards[i + 1];
        }
        strides
    }

    /// Fix `var` to `state` and drop it from the scope
    pub(crate) fn reduce(&self, var: usize, state: usize) -> Self {
        let Some(pos) = self.vars.iter().position(|v| *v == var) else {
            return self.clone();
        };
        let strides = Self::strides(&self.cards);
        let mut vars = self.vars.clone();
        let mut cards = self.cards.clone();
        vars.remove(pos);
        cards.remove(pos);
        let values = (0..self.values.len())
            .filter(|i| (i / strides[pos]) % self.cards[pos] == state)
            .map(|i| self.values[i])
            .collect();
        Self::new(vars, cards, values)
    }

    /// Pointwise product over the union of both scopes
    pub(crate) fn product(&self, other: &Self) -> Self {
        let mut vars = self.vars.clone();
        let mut cards = self.cards.clone();
        for (v, c) in other.vars.iter().zip(&other.cards) {
            if !vars.contains(v) {
                vars.push(*v);
                cards.push(*c);
            }
        }
        let project = |factor: &Self| -> Vec<usize> {
            let strides = Self::strides(&factor.cards);
            vars.iter()
                .map(|v| {
                    factor
                        .vars
                        .iter()
                        .position(|f| f == v)
                        .map_or(0, |p| strides[p])
                })
                .collect()
        };
        let (left, right) = (project(self), project(other));

        let size: usize = cards.iter().product();
        let mut values = Vec::with_capacity(size);
        let mut assignment = vec![0usize; vars.len()];
        let (mut l, mut r) = (0usize, 0usize);
        for _ in 0..size {
            values.push(self.values[l] * other.values[r]);
            for pos in (0..vars.len()).rev() {
                assignment[pos] += 1;
                l += left[pos];
                r += right[pos];
                if assignment[pos] < cards[pos] {
                    break;
                }
                l -= left[pos] * cards[pos];
                r -= right[pos] * cards[pos];
                assignment[pos] = 0;
            }
        }
        Self::new(vars, cards, values)
    }

    /// Sum `var` out of the factor
    pub(crate) fn marginalize(&self, var: usize) -> Self {
        let Some(pos) = self.vars.iter().position(|v| *v == var) else {
            return self.clone();
        };
        let strides = Self::strides(&self.cards);
        let mut vars = self.vars.clone();
        let mut cards = self.cards.clone();
        vars.remove(pos);
        cards.remove(pos);
        let outer = strides[pos] * self.cards[pos];
        let mut values = vec![0.0; self.values.len() / self.cards[pos]];
        for (i, value) in self.values.iter().enumerate() {
            let high = i / outer;
            let low = i % strides[pos];
            values[high * strides[pos] + low] += value;
        }
        Self::new(vars, cards, values)
    }

    /// Product of many factors
    pub(crate) fn product_all<'a, I>(factors: I) -> Self
    where
        I: IntoIterator<Item = &'a Factor>,
    {
        factors
            .into_iter()
            .fold(Self::scalar(1.0), |acc, f| acc.product(f))
    }
}
