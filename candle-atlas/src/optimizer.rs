use crate::error::ModelError;
use candle_core::{Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, SGD};
use std::str::FromStr;

const RMSPROP_RHO: f64 = 0.9;
const ADAGRAD_EPS: f64 = 1e-7;
const RMSPROP_EPS: f64 = 1e-7;

///
/// The optimizers the training driver can be asked for by name
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    Sgd,
    RmsProp,
    Adagrad,
}

impl FromStr for OptimizerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            "adagrad" => Ok(OptimizerKind::Adagrad),
            _ => Err(ModelError::UnknownOptimizer(s.to_string()).into()),
        }
    }
}

///
/// One facade over the four supported steppers so that the learning
/// rate schedule applies uniformly.
///
pub enum AtlasOptimizer {
    Adam(AdamW),
    Sgd(SGD),
    RmsProp(RmsProp),
    Adagrad(Adagrad),
}

impl AtlasOptimizer {
    pub fn build(
        kind: OptimizerKind,
        vars: Vec<Var>,
        learning_rate: f64,
    ) -> anyhow::Result<Self> {
        Ok(match kind {
            OptimizerKind::Adam => AtlasOptimizer::Adam(AdamW::new_lr(vars, learning_rate)?),
            OptimizerKind::Sgd => AtlasOptimizer::Sgd(SGD::new(vars, learning_rate)?),
            OptimizerKind::RmsProp => AtlasOptimizer::RmsProp(RmsProp::new(vars, learning_rate)?),
            OptimizerKind::Adagrad => AtlasOptimizer::Adagrad(Adagrad::new(vars, learning_rate)?),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            AtlasOptimizer::Adam(opt) => opt.backward_step(loss),
            AtlasOptimizer::Sgd(opt) => opt.backward_step(loss),
            AtlasOptimizer::RmsProp(opt) => opt.backward_step(loss),
            AtlasOptimizer::Adagrad(opt) => opt.backward_step(loss),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            AtlasOptimizer::Adam(opt) => opt.learning_rate(),
            AtlasOptimizer::Sgd(opt) => opt.learning_rate(),
            AtlasOptimizer::RmsProp(opt) => opt.learning_rate,
            AtlasOptimizer::Adagrad(opt) => opt.learning_rate,
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            AtlasOptimizer::Adam(opt) => opt.set_learning_rate(lr),
            AtlasOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
            AtlasOptimizer::RmsProp(opt) => opt.learning_rate = lr,
            AtlasOptimizer::Adagrad(opt) => opt.learning_rate = lr,
        }
    }
}

///
/// RMSProp over a set of `Var`s: keep a running average of squared
/// gradients, divide each step by its square root.
///
pub struct RmsProp {
    vars: Vec<Var>,
    avg_sq: Vec<Tensor>,
    pub learning_rate: f64,
}

impl RmsProp {
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let avg_sq = vars
            .iter()
            .map(|var| Tensor::zeros_like(var.as_tensor()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            avg_sq,
            learning_rate,
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        for (var, avg) in self.vars.iter().zip(self.avg_sq.iter_mut()) {
            if let Some(grad) = grads.get(var) {
                let new_avg =
                    ((&*avg * RMSPROP_RHO)? + (grad.sqr()? * (1. - RMSPROP_RHO))?)?;
                let denom = (new_avg.sqrt()? + RMSPROP_EPS)?;
                let delta = (grad.div(&denom)? * self.learning_rate)?;
                var.set(&var.sub(&delta)?)?;
                *avg = new_avg;
            }
        }
        Ok(())
    }
}

///
/// Adagrad over a set of `Var`s: accumulate squared gradients and
/// scale each step by the accumulated magnitude.
///
pub struct Adagrad {
    vars: Vec<Var>,
    accum: Vec<Tensor>,
    pub learning_rate: f64,
}

impl Adagrad {
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let accum = vars
            .iter()
            .map(|var| Tensor::zeros_like(var.as_tensor()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            accum,
            learning_rate,
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        for (var, accum) in self.vars.iter().zip(self.accum.iter_mut()) {
            if let Some(grad) = grads.get(var) {
                let new_accum = (&*accum + grad.sqr()?)?;
                let denom = (new_accum.sqrt()? + ADAGRAD_EPS)?;
                let delta = (grad.div(&denom)? * self.learning_rate)?;
                var.set(&var.sub(&delta)?)?;
                *accum = new_accum;
            }
        }
        Ok(())
    }
}
