mod layer_convolution;
mod layer_xnor_net;
