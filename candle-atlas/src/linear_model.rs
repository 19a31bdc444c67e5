use crate::losses::gaussian_kl_loss;
use crate::model_traits::{ClassifierModuleT, DecoderModuleT, EncoderModuleT};
use candle_core::{DType, Result, Tensor};
use candle_nn::{linear, ops, Linear, Module, VarBuilder};

///
/// The reference models for the `linear` family: a single linear map
/// on log1p-transformed counts with an optional Gaussian
/// reparameterization head. The deep families implement the same
/// module traits elsewhere; everything downstream is agnostic.
///

pub struct LinearEncoder {
    n_features: usize,
    n_latent: usize,
    variational: bool,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl LinearEncoder {
    /// Variables created: `nn.enc.z.mean.{weight,bias}` and
    /// `nn.enc.z.lnvar.{weight,bias}`
    pub fn new(
        n_features: usize,
        n_latent: usize,
        variational: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let z_mean = linear(n_features, n_latent, vb.pp("nn.enc.z.mean"))?;
        let z_lnvar = linear(n_features, n_latent, vb.pp("nn.enc.z.lnvar"))?;
        Ok(Self {
            n_features,
            n_latent,
            variational,
            z_mean,
            z_lnvar,
        })
    }

    /// z = mu + sigma * eps, eps ~ N(0, 1)
    fn reparameterize(&self, z_mean: &Tensor, z_lnvar: &Tensor, train: bool) -> Result<Tensor> {
        if train {
            let eps = Tensor::randn_like(z_mean, 0., 1.)?;
            z_mean + (z_lnvar * 0.5)?.exp()? * eps
        } else {
            Ok(z_mean.clone())
        }
    }
}

impl EncoderModuleT for LinearEncoder {
    fn forward_t(
        &self,
        x_nd: &Tensor,
        _size_factor_n: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let min_mean = -(self.n_features as f64).sqrt(); // stabilize
        let max_mean = (self.n_features as f64).sqrt(); // mean
        let min_lv = -8.; // and log variance
        let max_lv = 8.;

        let log1p_nd = (x_nd + 1.)?.log()?;
        let z_mean_nk = self
            .z_mean
            .forward(&log1p_nd)?
            .clamp(min_mean, max_mean)?;

        if self.variational {
            let z_lnvar_nk = self.z_lnvar.forward(&log1p_nd)?.clamp(min_lv, max_lv)?;
            let z_nk = self.reparameterize(&z_mean_nk, &z_lnvar_nk, train)?;
            Ok((z_nk, gaussian_kl_loss(&z_mean_nk, &z_lnvar_nk)?))
        } else {
            let n_obs = x_nd.dims()[0];
            let kl_n = Tensor::zeros(n_obs, DType::F32, x_nd.device())?;
            Ok((z_mean_nk, kl_n))
        }
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

pub struct LinearDecoder {
    n_features: usize,
    n_latent: usize,
    output: Linear,
}

impl LinearDecoder {
    /// Variables created: `nn.dec.output.{weight,bias}`
    pub fn new(n_features: usize, n_latent: usize, vb: VarBuilder) -> Result<Self> {
        let output = linear(n_latent, n_features, vb.pp("nn.dec.output"))?;
        Ok(Self {
            n_features,
            n_latent,
            output,
        })
    }
}

impl DecoderModuleT for LinearDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        self.output.forward(z_nk)
    }

    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let recon_nd = self.forward(z_nk)?;
        let llik_n = llik(x_nd, &recon_nd)?;
        Ok((recon_nd, llik_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

pub struct LinearClassifier {
    n_features: usize,
    n_types: usize,
    fc: Linear,
}

impl LinearClassifier {
    /// Variables created: `nn.celltype.fc.{weight,bias}`
    pub fn new(n_features: usize, n_types: usize, vb: VarBuilder) -> Result<Self> {
        let fc = linear(n_features, n_types, vb.pp("nn.celltype.fc"))?;
        Ok(Self {
            n_features,
            n_types,
            fc,
        })
    }
}

impl ClassifierModuleT for LinearClassifier {
    fn forward_t(&self, x_nd: &Tensor, _train: bool) -> Result<Tensor> {
        let log1p_nd = (x_nd + 1.)?.log()?;
        let logits_nk = self.fc.forward(&log1p_nd)?;
        ops::softmax(&logits_nk, 1)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn num_types(&self) -> usize {
        self.n_types
    }
}
