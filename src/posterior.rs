use crate::likelihood::LogLikelihood;
use crate::prior::Prior;
use crate::registry::LambdaLayout;
use crate::selection::SelectionTerm;

/// Unnormalized log density over a parameter vector, as consumed by the
/// ensemble sampler.
pub trait LogpFunc: Sync {
    fn dim(&self) -> usize;

    fn logp(&self, position: &[f64]) -> f64;

    /// Whether `position` has non-zero prior support. Used to validate
    /// starting points without evaluating the full density.
    fn in_support(&self, _position: &[f64]) -> bool {
        true
    }
}

/// `log p(theta | data) = log pi(theta) + log L(Lambda) + selection(Lambda)`,
/// where `Lambda` is `theta` scattered into the base values of all other
/// hyper-parameters.
#[derive(Debug)]
pub struct Posterior<L, S> {
    prior: Prior,
    likelihood: L,
    selection: S,
    layout: LambdaLayout,
}

impl<L: LogLikelihood, S: SelectionTerm> Posterior<L, S> {
    pub fn new(prior: Prior, likelihood: L, selection: S, layout: LambdaLayout) -> Self {
        assert!(prior.dim() == layout.dim());
        Self {
            prior,
            likelihood,
            selection,
            layout,
        }
    }

    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    pub fn likelihood(&self) -> &L {
        &self.likelihood
    }

    pub fn selection(&self) -> &S {
        &self.selection
    }

    pub fn layout(&self) -> &LambdaLayout {
        &self.layout
    }

    /// The likelihood terms are only evaluated where the prior is non-zero.
    pub fn log_posterior(&self, theta: &[f64]) -> f64 {
        let log_prior = self.prior.log_prior(theta);
        if log_prior == f64::NEG_INFINITY || log_prior.is_nan() {
            return f64::NEG_INFINITY;
        }
        let lambda = self.layout.fill(theta);
        let log_like = self.likelihood.log_likelihood(&lambda);
        let log_sel = self.selection.log_selection(&lambda);
        log_prior + log_like + log_sel
    }
}

impl<L: LogLikelihood, S: SelectionTerm> LogpFunc for Posterior<L, S> {
    fn dim(&self) -> usize {
        self.prior.dim()
    }

    fn logp(&self, position: &[f64]) -> f64 {
        self.log_posterior(position)
    }

    fn in_support(&self, position: &[f64]) -> bool {
        self.prior.contains(position)
    }
}
