//! Adam

use crate::network::{Gradients, PolicyNetwork};

pub const ADAM_BETA1: f32 = 0.9;
pub const ADAM_BETA2: f32 = 0.999;
pub const ADAM_EPSILON: f32 = 1e-8;

/// パラメータごとの1次・2次モーメント（テンソル順は w1, b1, w2, b2）
pub struct AdamState {
    m: [Vec<f32>; 4],
    v: [Vec<f32>; 4],
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub t: usize,
}

impl AdamState {
    pub fn new(network: &PolicyNetwork) -> Self {
        let zeros = |i: usize| vec![0.0f32; network.tensors()[i].len()];
        AdamState {
            m: [zeros(0), zeros(1), zeros(2), zeros(3)],
            v: [zeros(0), zeros(1), zeros(2), zeros(3)],
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            epsilon: ADAM_EPSILON,
            t: 0,
        }
    }

    /// 1ステップ更新する
    pub fn step(&mut self, network: &mut PolicyNetwork, grads: &Gradients, lr: f32) {
        self.t += 1;
        let t = self.t as f32;
        let lr_t = lr * (1.0 - self.beta2.powf(t)).sqrt() / (1.0 - self.beta1.powf(t));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        let params = network.tensors_mut();
        let grads = grads.tensors();
        for (((param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            for i in 0..param.len() {
                let g = grad[i];
                m[i] = beta1 * m[i] + (1.0 - beta1) * g;
                v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                param[i] -= lr_t * m[i] / (v[i].sqrt() + epsilon);
            }
        }
    }
}
