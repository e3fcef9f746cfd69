// src/nn.rs
//
// Minimal dense networks for the actor-critic agent: linear layers with
// manual backprop, ReLU/sigmoid activations and an Adam optimizer. Batch
// convention is row-major: inputs are (batch, features).

use ndarray::{Array1, Array2, Axis, Ix1, Ix2, Zip};
use rand::Rng;

use crate::params::{ParamError, ParamSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
    Identity,
}

impl Activation {
    fn apply(&self, z: Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => z,
        }
    }

    /// Gradient through the activation, expressed via its output `a`.
    fn backward(&self, grad: &Array2<f64>, output: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => {
                let mut out = grad.clone();
                out.zip_mut_with(output, |g, a| {
                    if *a <= 0.0 {
                        *g = 0.0;
                    }
                });
                out
            }
            Activation::Sigmoid => {
                let mut out = grad.clone();
                out.zip_mut_with(output, |g, a| *g *= a * (1.0 - a));
                out
            }
            Activation::Identity => grad.clone(),
        }
    }
}

/// Dense layer, weights stored (out, in).
#[derive(Debug, Clone)]
pub struct Linear {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl Linear {
    /// Uniform init in [-1/sqrt(in), 1/sqrt(in)] for weights and biases.
    fn init(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (in_dim as f64).sqrt();
        Self {
            w: Array2::from_shape_fn((out_dim, in_dim), |_| rng.gen_range(-bound..bound)),
            b: Array1::from_shape_fn(out_dim, |_| rng.gen_range(-bound..bound)),
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.w.t()) + &self.b
    }
}

/// Per-layer parameter gradients (also reused as Adam moment buffers).
#[derive(Debug, Clone)]
pub struct LinearGrads {
    pub w: Array2<f64>,
    pub b: Array1<f64>,
}

impl LinearGrads {
    fn zeros_like(layer: &Linear) -> Self {
        Self {
            w: Array2::zeros(layer.w.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }
}

/// Cached forward activations for one layer.
#[derive(Debug, Clone)]
pub struct LayerCache {
    /// Input fed to the linear transform.
    input: Array2<f64>,
    /// Post-activation output.
    output: Array2<f64>,
}

/// A small fully-connected network.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    acts: Vec<Activation>,
}

impl Mlp {
    /// Build from layer widths and one activation per layer.
    /// `dims` has one more entry than `acts`.
    pub fn new(dims: &[usize], acts: &[Activation], rng: &mut impl Rng) -> Self {
        debug_assert_eq!(dims.len(), acts.len() + 1);
        let layers = dims
            .windows(2)
            .map(|w| Linear::init(w[0], w[1], rng))
            .collect();
        Self {
            layers,
            acts: acts.to_vec(),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, idx: usize) -> &Linear {
        &self.layers[idx]
    }

    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut h = x.clone();
        for (layer, act) in self.layers.iter().zip(self.acts.iter()) {
            h = act.apply(layer.forward(&h));
        }
        h
    }

    /// Forward pass retaining the per-layer activations for backprop.
    pub fn forward_cached(&self, x: &Array2<f64>) -> (Array2<f64>, Vec<LayerCache>) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();
        for (layer, act) in self.layers.iter().zip(self.acts.iter()) {
            let input = h;
            let output = act.apply(layer.forward(&input));
            caches.push(LayerCache {
                input,
                output: output.clone(),
            });
            h = output;
        }
        (h, caches)
    }

    /// Backpropagate `grad_output` (gradient w.r.t. the network output)
    /// through the cached forward pass. Returns per-layer parameter
    /// gradients plus the gradient w.r.t. the network input.
    pub fn backward(
        &self,
        caches: &[LayerCache],
        grad_output: &Array2<f64>,
    ) -> (Vec<LinearGrads>, Array2<f64>) {
        debug_assert_eq!(caches.len(), self.layers.len());

        let mut grads: Vec<LinearGrads> = Vec::with_capacity(self.layers.len());
        let mut grad = grad_output.clone();

        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let cache = &caches[idx];

            let dz = self.acts[idx].backward(&grad, &cache.output);
            let dw = dz.t().dot(&cache.input);
            let db = dz.sum_axis(Axis(0));
            grad = dz.dot(&layer.w);

            grads.push(LinearGrads { w: dw, b: db });
        }

        grads.reverse();
        (grads, grad)
    }

    /// Export parameters as named tensors ("fc1.weight", "fc1.bias", ...).
    pub fn param_set(&self) -> ParamSet {
        let mut set = ParamSet::new();
        for (i, layer) in self.layers.iter().enumerate() {
            set.insert(format!("fc{}.weight", i + 1), layer.w.clone().into_dyn());
            set.insert(format!("fc{}.bias", i + 1), layer.b.clone().into_dyn());
        }
        set
    }

    /// Load parameters exported by `param_set`. Shapes must match.
    pub fn load_param_set(&mut self, set: &ParamSet) -> Result<(), ParamError> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let wkey = format!("fc{}.weight", i + 1);
            let bkey = format!("fc{}.bias", i + 1);

            let w = set.get(&wkey).ok_or_else(|| ParamError::MissingKey {
                key: wkey.clone(),
            })?;
            let b = set.get(&bkey).ok_or_else(|| ParamError::MissingKey {
                key: bkey.clone(),
            })?;

            let w = w
                .clone()
                .into_dimensionality::<Ix2>()
                .map_err(|_| ParamError::ShapeMismatch {
                    key: wkey.clone(),
                    expected: layer.w.shape().to_vec(),
                    got: w.shape().to_vec(),
                })?;
            if w.raw_dim() != layer.w.raw_dim() {
                return Err(ParamError::ShapeMismatch {
                    key: wkey,
                    expected: layer.w.shape().to_vec(),
                    got: w.shape().to_vec(),
                });
            }

            let b = b
                .clone()
                .into_dimensionality::<Ix1>()
                .map_err(|_| ParamError::ShapeMismatch {
                    key: bkey.clone(),
                    expected: layer.b.shape().to_vec(),
                    got: b.shape().to_vec(),
                })?;
            if b.raw_dim() != layer.b.raw_dim() {
                return Err(ParamError::ShapeMismatch {
                    key: bkey,
                    expected: layer.b.shape().to_vec(),
                    got: b.shape().to_vec(),
                });
            }

            layer.w = w;
            layer.b = b;
        }
        Ok(())
    }

    /// Polyak update: self ← tau * online + (1 − tau) * self.
    pub fn soft_update_from(&mut self, online: &Mlp, tau: f64) {
        for (target, src) in self.layers.iter_mut().zip(online.layers.iter()) {
            target
                .w
                .zip_mut_with(&src.w, |t, o| *t = tau * o + (1.0 - tau) * *t);
            target
                .b
                .zip_mut_with(&src.b, |t, o| *t = tau * o + (1.0 - tau) * *t);
        }
    }
}

/// Adam optimizer over an `Mlp`'s parameters.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: u64,
    m: Vec<LinearGrads>,
    v: Vec<LinearGrads>,
}

impl Adam {
    pub fn new(lr: f64, net: &Mlp) -> Self {
        let m = net.layers.iter().map(LinearGrads::zeros_like).collect();
        let v = net.layers.iter().map(LinearGrads::zeros_like).collect();
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m,
            v,
        }
    }

    pub fn step(&mut self, net: &mut Mlp, grads: &[LinearGrads]) {
        debug_assert_eq!(grads.len(), net.layers.len());
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);

        let update = move |p: &mut f64, g: f64, m: &mut f64, v: &mut f64| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bc1;
            let v_hat = *v / bc2;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        };

        for (((layer, grad), m), v) in net
            .layers
            .iter_mut()
            .zip(grads.iter())
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(&mut layer.w)
                .and(&grad.w)
                .and(&mut m.w)
                .and(&mut v.w)
                .for_each(|p, &g, m, v| update(p, g, m, v));
            Zip::from(&mut layer.b)
                .and(&grad.b)
                .and(&mut m.b)
                .and(&mut v.b)
                .for_each(|p, &g, m, v| update(p, g, m, v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tiny_net(seed: u64) -> Mlp {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Mlp::new(
            &[2, 3, 1],
            &[Activation::Relu, Activation::Sigmoid],
            &mut rng,
        )
    }

    #[test]
    fn forward_shapes_and_sigmoid_bounds() {
        let net = tiny_net(1);
        let x = Array2::from_shape_fn((4, 2), |(i, j)| (i as f64) - (j as f64) * 0.5);
        let y = net.forward(&x);
        assert_eq!(y.dim(), (4, 1));
        for v in y.iter() {
            assert!(*v > 0.0 && *v < 1.0);
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut net = tiny_net(2);
        let x = Array2::from_shape_fn((3, 2), |(i, j)| 0.3 * (i as f64) - 0.7 * (j as f64) + 0.1);

        // Scalar objective: sum of outputs.
        let loss = |net: &Mlp| net.forward(&x).sum();

        let (out, caches) = net.forward_cached(&x);
        let grad_out = Array2::ones(out.raw_dim());
        let (grads, grad_input) = net.backward(&caches, &grad_out);

        let h = 1e-6;
        for layer_idx in 0..net.num_layers() {
            let (rows, cols) = net.layer(layer_idx).w.dim();
            for r in 0..rows {
                for c in 0..cols {
                    let orig = net.layers[layer_idx].w[[r, c]];
                    net.layers[layer_idx].w[[r, c]] = orig + h;
                    let up = loss(&net);
                    net.layers[layer_idx].w[[r, c]] = orig - h;
                    let down = loss(&net);
                    net.layers[layer_idx].w[[r, c]] = orig;

                    let numeric = (up - down) / (2.0 * h);
                    let analytic = grads[layer_idx].w[[r, c]];
                    assert!(
                        (numeric - analytic).abs() < 1e-4,
                        "layer {layer_idx} w[{r},{c}]: numeric {numeric} vs analytic {analytic}"
                    );
                }
            }
            for i in 0..net.layer(layer_idx).b.len() {
                let orig = net.layers[layer_idx].b[i];
                net.layers[layer_idx].b[i] = orig + h;
                let up = loss(&net);
                net.layers[layer_idx].b[i] = orig - h;
                let down = loss(&net);
                net.layers[layer_idx].b[i] = orig;

                let numeric = (up - down) / (2.0 * h);
                let analytic = grads[layer_idx].b[i];
                assert!(
                    (numeric - analytic).abs() < 1e-4,
                    "layer {layer_idx} b[{i}]: numeric {numeric} vs analytic {analytic}"
                );
            }
        }

        // Input gradient via finite differences too.
        let mut x_var = x.clone();
        for i in 0..x_var.nrows() {
            for j in 0..x_var.ncols() {
                let orig = x_var[[i, j]];
                x_var[[i, j]] = orig + h;
                let up = net.forward(&x_var).sum();
                x_var[[i, j]] = orig - h;
                let down = net.forward(&x_var).sum();
                x_var[[i, j]] = orig;

                let numeric = (up - down) / (2.0 * h);
                assert!(
                    (numeric - grad_input[[i, j]]).abs() < 1e-4,
                    "input grad [{i},{j}]"
                );
            }
        }
    }

    #[test]
    fn adam_reduces_regression_loss() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut net = Mlp::new(&[1, 1], &[Activation::Identity], &mut rng);
        let mut opt = Adam::new(0.05, &net);

        // Fit y = 2x + 1 on a tiny fixed grid.
        let x = Array2::from_shape_fn((8, 1), |(i, _)| i as f64 / 8.0);
        let target = x.mapv(|v| 2.0 * v + 1.0);

        let mse = |net: &Mlp| {
            let pred = net.forward(&x);
            (&pred - &target).mapv(|d| d * d).mean().unwrap_or(0.0)
        };

        let initial = mse(&net);
        for _ in 0..200 {
            let (pred, caches) = net.forward_cached(&x);
            let n = pred.len() as f64;
            let grad_out = (&pred - &target).mapv(|d| 2.0 * d / n);
            let (grads, _) = net.backward(&caches, &grad_out);
            opt.step(&mut net, &grads);
        }
        let trained = mse(&net);

        assert!(
            trained < initial * 0.1,
            "loss did not shrink: {initial} -> {trained}"
        );
    }

    #[test]
    fn param_set_round_trip() {
        let net = tiny_net(9);
        let set = net.param_set();
        assert_eq!(set.len(), 4);

        let mut other = tiny_net(10);
        other.load_param_set(&set).unwrap();
        assert_eq!(other.param_set().flatten(), set.flatten());
    }

    #[test]
    fn load_rejects_wrong_layout() {
        let mut net = tiny_net(3);
        let other = {
            let mut rng = ChaCha8Rng::seed_from_u64(4);
            Mlp::new(
                &[2, 4, 1],
                &[Activation::Relu, Activation::Sigmoid],
                &mut rng,
            )
        };
        let err = net.load_param_set(&other.param_set()).unwrap_err();
        assert!(matches!(err, ParamError::ShapeMismatch { .. }));
    }

    #[test]
    fn soft_update_blends_parameters() {
        let mut target = tiny_net(6);
        let online = tiny_net(7);
        let before = target.layer(0).w[[0, 0]];
        let src = online.layer(0).w[[0, 0]];

        let tau = 0.25;
        target.soft_update_from(&online, tau);
        let after = target.layer(0).w[[0, 0]];
        assert!((after - (tau * src + (1.0 - tau) * before)).abs() < 1e-12);
    }
}
